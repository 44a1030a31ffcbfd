use crate::types::TokenUsage;

pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str) -> usize;

    /// Usage for a prompt/completion pair when the backend reported none.
    fn estimate_usage(&self, prompt: &str, completion: &str) -> TokenUsage {
        TokenUsage::new(self.count(prompt) as u64, self.count(completion) as u64)
    }
}

#[derive(Debug, Clone)]
pub struct CharacterEstimator {
    chars_per_token: f64,
}

impl CharacterEstimator {
    pub fn new() -> Self {
        Self::with_ratio(4.0)
    }

    pub fn with_ratio(r: f64) -> Self {
        Self {
            chars_per_token: if r > 0.0 { r } else { 4.0 },
        }
    }
}

impl Default for CharacterEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenCounter for CharacterEstimator {
    fn count(&self, text: &str) -> usize {
        (text.chars().count() as f64 / self.chars_per_token).ceil() as usize
    }
}
