use serde::{Deserialize, Serialize};

use crate::error::GenerationError;

/// Minimum and maximum number of options a quiz question may carry.
pub const MIN_QUIZ_OPTIONS: usize = 3;
pub const MAX_QUIZ_OPTIONS: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Flashcard {
    pub question: String,
    pub answer: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QuizQuestion {
    pub question: String,
    pub options: Vec<String>,
    pub correct: String,
}

impl QuizQuestion {
    pub fn is_well_formed(&self) -> bool {
        (MIN_QUIZ_OPTIONS..=MAX_QUIZ_OPTIONS).contains(&self.options.len())
            && self.options.contains(&self.correct)
    }
}

/// Payload the provider is constrained to return.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StudyMaterial {
    pub title: String,
    pub summary: String,
    pub flashcards: Vec<Flashcard>,
    pub quiz_questions: Vec<QuizQuestion>,
}

impl StudyMaterial {
    pub fn parse(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload)
    }

    /// Clears every section the caller did not ask for.
    pub fn retain_requested(&mut self, request: &GenerationRequest) {
        if !request.include_summary {
            self.summary.clear();
        }
        if !request.include_flashcards {
            self.flashcards.clear();
        }
        if !request.include_quiz {
            self.quiz_questions.clear();
        }
    }

    pub fn validate_quiz(&self) -> Result<(), GenerationError> {
        match self.quiz_questions.iter().position(|q| !q.is_well_formed()) {
            Some(index) => {
                tracing::error!(index, "Quiz question violates option constraints");
                Err(GenerationError::MalformedProviderResponse)
            }
            None => Ok(()),
        }
    }
}

/// Input to a single generation call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerationRequest {
    pub text: String,
    pub include_summary: bool,
    pub include_flashcards: bool,
    pub include_quiz: bool,
}

impl GenerationRequest {
    pub fn is_empty_selection(&self) -> bool {
        !self.include_summary && !self.include_flashcards && !self.include_quiz
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationResult {
    pub id: String,
    pub title: String,
    pub summary: String,
    pub flashcards: Vec<Flashcard>,
    pub quiz_questions: Vec<QuizQuestion>,
}

impl GenerationResult {
    /// A result with a fresh id and every content field empty.
    pub fn empty() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            ..Default::default()
        }
    }

    pub fn from_material(material: StudyMaterial) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title: material.title,
            summary: material.summary,
            flashcards: material.flashcards,
            quiz_questions: material.quiz_questions,
        }
    }
}
