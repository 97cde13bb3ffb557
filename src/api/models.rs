use serde::Deserialize;

use crate::models::GenerationRequest;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct GenerateRequest {
    pub prompt: String,
    pub summary: bool,
    pub flashcards: bool,
    pub quiz: bool,
    #[serde(rename = "turnstile")]
    pub captcha_token: String,
}

impl From<GenerateRequest> for GenerationRequest {
    fn from(req: GenerateRequest) -> Self {
        GenerationRequest {
            text: req.prompt,
            include_summary: req.summary,
            include_flashcards: req.flashcards,
            include_quiz: req.quiz,
        }
    }
}

#[derive(Debug, serde::Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
}
