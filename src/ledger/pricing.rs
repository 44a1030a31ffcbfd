//! Model pricing and cost estimation.

use serde::{Deserialize, Serialize};

use crate::types::TokenUsage;

/// USD prices per 1k tokens for one model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    pub model: String,
    pub input_cost_per_1k: f64,
    pub output_cost_per_1k: f64,
}

impl ModelPricing {
    pub fn new(model: &str, input: f64, output: f64) -> Self {
        Self {
            model: model.into(),
            input_cost_per_1k: input,
            output_cost_per_1k: output,
        }
    }

    /// Cost in USD of `usage` at this price.
    pub fn cost(&self, usage: &TokenUsage) -> f64 {
        let ic = (usage.prompt_tokens as f64 / 1000.0) * self.input_cost_per_1k;
        let oc = (usage.completion_tokens as f64 / 1000.0) * self.output_cost_per_1k;
        ic + oc
    }

    pub fn gpt_4o() -> Self {
        Self::new("gpt-4o", 0.005, 0.015)
    }
    pub fn gpt_4o_mini() -> Self {
        Self::new("gpt-4o-mini", 0.00015, 0.0006)
    }
    pub fn claude_35_sonnet() -> Self {
        Self::new("claude-3-5-sonnet", 0.003, 0.015)
    }
    pub fn claude_3_haiku() -> Self {
        Self::new("claude-3-haiku", 0.00025, 0.00125)
    }
    pub fn gemini_15_flash() -> Self {
        Self::new("gemini-1.5-flash", 0.000075, 0.0003)
    }

    /// Built-in prices for common model families, matched by substring.
    pub fn for_model(model: &str) -> Option<Self> {
        let m = model.to_lowercase();
        if m.contains("gpt-4o-mini") {
            Some(Self::gpt_4o_mini())
        } else if m.contains("gpt-4o") {
            Some(Self::gpt_4o())
        } else if m.contains("claude-3-5-sonnet") {
            Some(Self::claude_35_sonnet())
        } else if m.contains("claude-3-haiku") {
            Some(Self::claude_3_haiku())
        } else if m.contains("gemini-1.5-flash") {
            Some(Self::gemini_15_flash())
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mini_is_matched_before_full_model() {
        assert_eq!(ModelPricing::for_model("gpt-4o-mini-2024-07-18").unwrap().model, "gpt-4o-mini");
        assert_eq!(ModelPricing::for_model("GPT-4o").unwrap().model, "gpt-4o");
        assert!(ModelPricing::for_model("llama3").is_none());
    }

    #[test]
    fn cost_uses_both_directions() {
        let p = ModelPricing::new("m", 1.0, 2.0);
        let c = p.cost(&TokenUsage::new(500, 1000));
        assert!((c - 2.5).abs() < 1e-9);
    }
}
