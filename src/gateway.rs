use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::error::GenerationError;
use crate::llm::{ProviderError, ProviderRequest, TextGenerator, MODEL};
use crate::models::{GenerationRequest, GenerationResult, StudyMaterial};
use crate::schema::STUDY_MATERIAL_SCHEMA;
use crate::tokens::TokenEstimator;
use crate::usage::UsageWindow;

pub const SYSTEM_INSTRUCTION: &str =
    "You are an educational assistant that outputs structured JSON for study materials.";

/// Turns study text into summaries, flashcards and quizzes under a shared
/// token budget.
///
/// The budget is reserved before the provider is called and is not refunded
/// if the call fails.
pub struct GenerationGateway {
    generator: Arc<dyn TextGenerator>,
    estimator: Arc<dyn TokenEstimator>,
    usage: Mutex<UsageWindow>,
}

impl GenerationGateway {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        estimator: Arc<dyn TokenEstimator>,
        window_length: Duration,
        token_limit: usize,
    ) -> Self {
        Self {
            generator,
            estimator,
            usage: Mutex::new(UsageWindow::new(window_length, token_limit, Instant::now())),
        }
    }

    /// Tokens committed in the current window.
    pub fn used_tokens(&self) -> usize {
        self.lock_usage().used()
    }

    pub async fn generate(
        &self,
        cancel: &CancellationToken,
        request: &GenerationRequest,
    ) -> Result<GenerationResult, GenerationError> {
        if cancel.is_cancelled() {
            return Err(GenerationError::Cancelled);
        }

        let estimated = self.reserve_tokens(&request.text)?;

        if request.is_empty_selection() {
            tracing::debug!(estimated, "No sections requested, skipping provider call");
            return Ok(GenerationResult::empty());
        }

        let instructions = build_instructions(request);
        let provider_request = ProviderRequest {
            model: MODEL,
            system_instruction: SYSTEM_INSTRUCTION,
            user_instruction: &instructions,
            schema: &STUDY_MATERIAL_SCHEMA,
        };

        let llm_start = Instant::now();
        let payload = tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                tracing::warn!(elapsed = ?llm_start.elapsed(), "Generation cancelled before provider responded");
                return Err(GenerationError::Cancelled);
            }
            result = self.generator.generate(&provider_request) => result.map_err(|e| match e {
                ProviderError::InvalidResponse(_) => {
                    tracing::error!(error = %e, "Provider returned an unusable reply");
                    GenerationError::MalformedProviderResponse
                }
                _ => {
                    tracing::error!(error = %e, "Provider call failed");
                    GenerationError::ProviderUnavailable
                }
            })?,
        };
        tracing::info!(elapsed = ?llm_start.elapsed(), estimated, "Provider call succeeded");

        let mut material = StudyMaterial::parse(&payload).map_err(|e| {
            tracing::error!(error = %e, raw = %payload, "Provider payload did not match schema");
            GenerationError::MalformedProviderResponse
        })?;

        material.retain_requested(request);
        material.validate_quiz()?;

        Ok(GenerationResult::from_material(material))
    }

    /// Refreshes the window, estimates `text` and commits it, all under one lock.
    fn reserve_tokens(&self, text: &str) -> Result<usize, GenerationError> {
        let mut usage = self.lock_usage();

        let estimated = self.estimator.count(text).map_err(|e| {
            tracing::error!(error = %e, "Failed to estimate tokens");
            GenerationError::EstimationFailed
        })?;

        if let Err(err) = usage.reserve(Instant::now(), estimated) {
            tracing::warn!(estimated, used = usage.used(), limit = usage.limit(), "Token budget exhausted");
            return Err(err);
        }

        tracing::debug!(estimated, used = usage.used(), limit = usage.limit(), "Reserved tokens");
        Ok(estimated)
    }

    // The window is updated with a single assignment, so a panic elsewhere
    // while holding the lock cannot leave it half-written.
    fn lock_usage(&self) -> MutexGuard<'_, UsageWindow> {
        self.usage.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// User instruction listing only the requested tasks, followed by the text.
pub fn build_instructions(request: &GenerationRequest) -> String {
    let tasks = [
        (request.include_summary, "Write a short, clear summary of the text."),
        (request.include_flashcards, "Create study flashcards (Q/A pairs)."),
        (
            request.include_quiz,
            "Generate multiple-choice quiz questions with 4 options each and mark the correct one.",
        ),
    ];

    let mut result = String::with_capacity(request.text.len() + 300);
    result.push_str("Perform the following tasks on this text:\n");
    for (number, task) in tasks.iter().filter(|(wanted, _)| *wanted).map(|(_, t)| t).enumerate() {
        result.push_str(&format!("{}. {}\n", number + 1, task));
    }
    result.push_str("\nIf a section is not requested, leave it empty.\n\nText:\n");
    result.push_str(&request.text);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokens::TokenizerError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts one token per whitespace-separated word.
    struct WordEstimator;

    impl TokenEstimator for WordEstimator {
        fn count(&self, text: &str) -> Result<usize, TokenizerError> {
            Ok(text.split_whitespace().count())
        }
    }

    struct BrokenEstimator;

    impl TokenEstimator for BrokenEstimator {
        fn count(&self, _text: &str) -> Result<usize, TokenizerError> {
            Err(TokenizerError("encoding missing".to_string()))
        }
    }

    enum Reply {
        Payload(&'static str),
        Fail,
        Refuse,
        Hang,
    }

    struct FakeGenerator {
        reply: Reply,
        calls: AtomicUsize,
        delay: Duration,
    }

    impl FakeGenerator {
        fn new(reply: Reply) -> Arc<Self> {
            Arc::new(Self {
                reply,
                calls: AtomicUsize::new(0),
                delay: Duration::ZERO,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TextGenerator for FakeGenerator {
        async fn generate(&self, request: &ProviderRequest<'_>) -> Result<String, ProviderError> {
            assert_eq!(request.system_instruction, SYSTEM_INSTRUCTION);
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            match self.reply {
                Reply::Payload(payload) => Ok(payload.to_string()),
                Reply::Fail => Err(ProviderError::Status {
                    status: 500,
                    body: "boom".to_string(),
                }),
                Reply::Refuse => Err(ProviderError::InvalidResponse("model refused: no".to_string())),
                Reply::Hang => std::future::pending().await,
            }
        }
    }

    const FULL_PAYLOAD: &str = r#"{
        "title": "T",
        "summary": "S",
        "flashcards": [{"question": "q", "answer": "a"}],
        "quiz_questions": [{"question": "Pick", "options": ["a", "b", "c", "d"], "correct": "b"}]
    }"#;

    fn gateway(generator: Arc<FakeGenerator>, limit: usize) -> GenerationGateway {
        GenerationGateway::new(generator, Arc::new(WordEstimator), Duration::from_secs(60), limit)
    }

    fn request(text: &str, summary: bool, flashcards: bool, quiz: bool) -> GenerationRequest {
        GenerationRequest {
            text: text.to_string(),
            include_summary: summary,
            include_flashcards: flashcards,
            include_quiz: quiz,
        }
    }

    fn words(n: usize) -> String {
        vec!["word"; n].join(" ")
    }

    #[tokio::test]
    async fn no_sections_skips_provider() {
        let generator = FakeGenerator::new(Reply::Payload(FULL_PAYLOAD));
        let gateway = gateway(generator.clone(), 0);

        let result = gateway
            .generate(&CancellationToken::new(), &request("some text", false, false, false))
            .await
            .unwrap();

        assert!(!result.id.is_empty());
        assert!(result.title.is_empty());
        assert!(result.summary.is_empty());
        assert!(result.flashcards.is_empty());
        assert!(result.quiz_questions.is_empty());
        assert_eq!(generator.calls(), 0);
        assert_eq!(gateway.used_tokens(), 2);
    }

    #[tokio::test]
    async fn unrequested_sections_are_zeroed() {
        let generator = FakeGenerator::new(Reply::Payload(FULL_PAYLOAD));
        let gateway = gateway(generator.clone(), 0);

        let result = gateway
            .generate(&CancellationToken::new(), &request("text", true, false, false))
            .await
            .unwrap();

        assert_eq!(result.title, "T");
        assert_eq!(result.summary, "S");
        assert!(result.flashcards.is_empty());
        assert!(result.quiz_questions.is_empty());
        assert_eq!(generator.calls(), 1);
    }

    #[tokio::test]
    async fn all_sections_pass_through() {
        let gateway = gateway(FakeGenerator::new(Reply::Payload(FULL_PAYLOAD)), 0);

        let result = gateway
            .generate(&CancellationToken::new(), &request("text", true, true, true))
            .await
            .unwrap();

        assert_eq!(result.flashcards.len(), 1);
        assert_eq!(result.quiz_questions[0].correct, "b");
        assert!(result.quiz_questions[0].options.contains(&result.quiz_questions[0].correct));
    }

    #[tokio::test]
    async fn over_budget_request_is_not_committed() {
        let generator = FakeGenerator::new(Reply::Payload(FULL_PAYLOAD));
        let gateway = gateway(generator.clone(), 1000);

        let err = gateway
            .generate(&CancellationToken::new(), &request(&words(1500), true, false, false))
            .await
            .unwrap_err();

        assert_eq!(err, GenerationError::RateLimitExceeded { used: 0, limit: 1000 });
        assert_eq!(gateway.used_tokens(), 0);
        assert_eq!(generator.calls(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_calls_cannot_double_spend() {
        let generator = Arc::new(FakeGenerator {
            reply: Reply::Payload(FULL_PAYLOAD),
            calls: AtomicUsize::new(0),
            delay: Duration::from_millis(20),
        });
        let gateway = Arc::new(gateway(generator.clone(), 1000));
        let text = words(600);

        let spawn = |gateway: Arc<GenerationGateway>, text: String| {
            tokio::spawn(async move {
                gateway
                    .generate(&CancellationToken::new(), &request(&text, true, false, false))
                    .await
            })
        };
        let (a, b) = tokio::join!(
            spawn(gateway.clone(), text.clone()),
            spawn(gateway.clone(), text.clone())
        );
        let results = [a.unwrap(), b.unwrap()];

        let successes = results.iter().filter(|r| r.is_ok()).count();
        let limited = results
            .iter()
            .filter(|r| matches!(r, Err(GenerationError::RateLimitExceeded { used: 600, limit: 1000 })))
            .count();
        assert_eq!((successes, limited), (1, 1));
        assert_eq!(gateway.used_tokens(), 600);
        assert_eq!(generator.calls(), 1);
    }

    #[tokio::test]
    async fn fresh_window_admits_previously_rejected_request() {
        let generator = FakeGenerator::new(Reply::Payload(FULL_PAYLOAD));
        let gateway = GenerationGateway::new(
            generator,
            Arc::new(WordEstimator),
            Duration::from_millis(50),
            1000,
        );
        let cancel = CancellationToken::new();

        gateway.generate(&cancel, &request(&words(700), true, false, false)).await.unwrap();
        assert!(gateway.generate(&cancel, &request(&words(500), true, false, false)).await.is_err());

        tokio::time::sleep(Duration::from_millis(60)).await;

        gateway.generate(&cancel, &request(&words(500), true, false, false)).await.unwrap();
        assert_eq!(gateway.used_tokens(), 500);
    }

    #[tokio::test]
    async fn estimation_failure_is_an_error() {
        let generator = FakeGenerator::new(Reply::Payload(FULL_PAYLOAD));
        let gateway = GenerationGateway::new(
            generator.clone(),
            Arc::new(BrokenEstimator),
            Duration::from_secs(60),
            1000,
        );

        let err = gateway
            .generate(&CancellationToken::new(), &request("text", true, false, false))
            .await
            .unwrap_err();

        assert_eq!(err, GenerationError::EstimationFailed);
        assert_eq!(generator.calls(), 0);
    }

    #[tokio::test]
    async fn provider_failure_keeps_reservation() {
        let gateway = gateway(FakeGenerator::new(Reply::Fail), 1000);

        let err = gateway
            .generate(&CancellationToken::new(), &request(&words(10), true, false, false))
            .await
            .unwrap_err();

        assert_eq!(err, GenerationError::ProviderUnavailable);
        assert_eq!(gateway.used_tokens(), 10);
    }

    #[tokio::test]
    async fn invalid_json_is_malformed_response() {
        let gateway = gateway(FakeGenerator::new(Reply::Payload("{not json")), 0);

        let result = gateway
            .generate(&CancellationToken::new(), &request("text", true, false, false))
            .await;

        assert_eq!(result, Err(GenerationError::MalformedProviderResponse));
    }

    #[tokio::test]
    async fn quiz_with_foreign_answer_is_malformed_response() {
        let payload = r#"{"title":"T","summary":"","flashcards":[],
            "quiz_questions":[{"question":"Pick","options":["a","b","c"],"correct":"z"}]}"#;
        let gateway = gateway(FakeGenerator::new(Reply::Payload(payload)), 0);

        let result = gateway
            .generate(&CancellationToken::new(), &request("text", false, false, true))
            .await;

        assert_eq!(result, Err(GenerationError::MalformedProviderResponse));
    }

    #[tokio::test]
    async fn bad_quiz_is_ignored_when_not_requested() {
        let payload = r#"{"title":"T","summary":"S","flashcards":[],
            "quiz_questions":[{"question":"Pick","options":["a"],"correct":"z"}]}"#;
        let gateway = gateway(FakeGenerator::new(Reply::Payload(payload)), 0);

        let result = gateway
            .generate(&CancellationToken::new(), &request("text", true, false, false))
            .await
            .unwrap();

        assert!(result.quiz_questions.is_empty());
    }

    #[tokio::test]
    async fn cancellation_aborts_hanging_provider() {
        let gateway = gateway(FakeGenerator::new(Reply::Hang), 0);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let result = gateway.generate(&cancel, &request("text", true, false, false)).await;

        assert_eq!(result, Err(GenerationError::Cancelled));
    }

    #[tokio::test]
    async fn precancelled_token_is_cancelled_without_reservation() {
        let generator = FakeGenerator::new(Reply::Payload(FULL_PAYLOAD));
        let gateway = gateway(generator.clone(), 1000);
        let cancel = CancellationToken::new();
        cancel.cancel();

        for _ in 0..50 {
            let result = gateway.generate(&cancel, &request("some text", true, false, false)).await;
            assert_eq!(result, Err(GenerationError::Cancelled));
        }
        let no_op = gateway.generate(&cancel, &request("some text", false, false, false)).await;

        assert_eq!(no_op, Err(GenerationError::Cancelled));
        assert_eq!(gateway.used_tokens(), 0);
        assert_eq!(generator.calls(), 0);
    }

    #[tokio::test]
    async fn refused_reply_is_malformed_response() {
        let gateway = gateway(FakeGenerator::new(Reply::Refuse), 0);

        let result = gateway
            .generate(&CancellationToken::new(), &request("text", true, false, false))
            .await;

        assert_eq!(result, Err(GenerationError::MalformedProviderResponse));
    }

    #[tokio::test]
    async fn ids_are_fresh_per_call() {
        let gateway = gateway(FakeGenerator::new(Reply::Payload(FULL_PAYLOAD)), 0);
        let cancel = CancellationToken::new();
        let req = request("text", true, true, true);

        let a = gateway.generate(&cancel, &req).await.unwrap();
        let b = gateway.generate(&cancel, &req).await.unwrap();

        assert_ne!(a.id, b.id);
    }

    #[test]
    fn instructions_list_only_requested_tasks() {
        let text = build_instructions(&request("The mitochondria is the powerhouse.", false, true, true));

        assert!(!text.contains("summary of the text"));
        assert!(text.contains("1. Create study flashcards (Q/A pairs)."));
        assert!(text.contains("2. Generate multiple-choice quiz questions with 4 options"));
        assert!(text.ends_with("Text:\nThe mitochondria is the powerhouse."));
    }
}
