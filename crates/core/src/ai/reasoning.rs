//! Extended-thinking/reasoning policy, centralized in one place so every
//! adapter derives the same budget and temperature from the same knobs.

use crate::ai::types::ThinkingConfig;

/// Fallback thinking budget when a caller doesn't size it off `max_tokens`.
pub const DEFAULT_THINKING_BUDGET: u32 = 32_000;

/// Fraction of the response's `max_tokens` set aside for thinking when
/// extended thinking is enabled.
const THINKING_BUDGET_FRACTION: f64 = 0.8;

/// Temperature providers require (and adapters must force) while extended
/// thinking is enabled — sampling temperature besides 1.0 is rejected by
/// thinking-capable models.
pub const THINKING_TEMPERATURE: f32 = 1.0;

/// Reasoning/thinking configuration shared by every provider adapter.
pub struct ReasoningConfig;

impl ReasoningConfig {
    /// Size a thinking budget off the response's `max_tokens`, honoring an
    /// explicit override when the caller supplied one.
    pub fn budget_for(max_tokens: u32, override_budget: Option<u32>) -> u32 {
        override_budget.unwrap_or_else(|| {
            ((max_tokens as f64) * THINKING_BUDGET_FRACTION).round() as u32
        })
    }

    /// Build the [`ThinkingConfig`] to attach to a request, or `None` when
    /// thinking isn't enabled for this call.
    pub fn build(enabled: bool, max_tokens: u32, override_budget: Option<u32>) -> Option<ThinkingConfig> {
        if !enabled {
            return None;
        }
        Some(ThinkingConfig {
            budget_tokens: Self::budget_for(max_tokens, override_budget),
        })
    }

    /// The temperature a request must use while thinking is enabled.
    pub fn temperature(enabled: bool, requested: f32) -> f32 {
        if enabled {
            THINKING_TEMPERATURE
        } else {
            requested
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_is_eighty_percent_of_max_tokens() {
        assert_eq!(ReasoningConfig::budget_for(10_000, None), 8_000);
    }

    #[test]
    fn explicit_override_wins() {
        assert_eq!(ReasoningConfig::budget_for(10_000, Some(1_234)), 1_234);
    }

    #[test]
    fn disabled_yields_no_config() {
        assert!(ReasoningConfig::build(false, 10_000, None).is_none());
    }

    #[test]
    fn enabled_yields_scaled_budget() {
        let cfg = ReasoningConfig::build(true, 20_000, None).unwrap();
        assert_eq!(cfg.budget_tokens, 16_000);
    }

    #[test]
    fn temperature_forced_to_one_when_thinking() {
        assert_eq!(ReasoningConfig::temperature(true, 0.2), 1.0);
        assert_eq!(ReasoningConfig::temperature(false, 0.2), 0.2);
    }
}
