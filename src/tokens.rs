use once_cell::sync::OnceCell;
use tiktoken_rs::CoreBPE;

#[derive(Debug, thiserror::Error)]
#[error("tokenizer unavailable: {0}")]
pub struct TokenizerError(pub String);

/// Estimates how many provider-billed tokens a text will consume.
pub trait TokenEstimator: Send + Sync {
    fn count(&self, text: &str) -> Result<usize, TokenizerError>;
}

/// `cl100k_base` BPE counter, matching the GPT-4 model family.
#[derive(Default)]
pub struct Cl100kEstimator {
    bpe: OnceCell<CoreBPE>,
}

impl Cl100kEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the encoding now so the first request does not pay for it
    /// while holding the usage lock.
    pub fn preload(&self) -> Result<(), TokenizerError> {
        self.bpe()?;
        Ok(())
    }

    fn bpe(&self) -> Result<&CoreBPE, TokenizerError> {
        self.bpe
            .get_or_try_init(tiktoken_rs::cl100k_base)
            .map_err(|e| TokenizerError(e.to_string()))
    }
}

impl TokenEstimator for Cl100kEstimator {
    fn count(&self, text: &str) -> Result<usize, TokenizerError> {
        Ok(self.bpe()?.encode_with_special_tokens(text).len())
    }
}
