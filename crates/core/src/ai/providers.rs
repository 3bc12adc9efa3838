//! Provider catalog: the upstream kinds this crate's adapters know how to
//! speak to, plus the per-model metadata (context window, output cap,
//! whether extended thinking is available) an adapter needs to build a
//! well-formed request.
//!
//! This is deliberately small. Cross-provider model-id translation and
//! vendor capability negotiation (the teacher's `ModelFamily`/
//! `MODEL_MAPPINGS`/`ProviderCapabilities`) don't apply here: spec §3 fixes
//! one concrete model per [`crate::config::ProviderConfig`] entry, so there
//! is nothing to translate between.

use serde::{Deserialize, Serialize};

/// The kind of upstream a [`crate::config::ProviderConfig`] talks to (spec
/// §3's `ProviderKind`). `Bedrock`/`VertexAi` are routers: requests are
/// reshaped and sent through AWS/GCP's envelope but ultimately reach the
/// same Anthropic or Gemini model family, so their adapters delegate to the
/// `Anthropic`/`Gemini` request builders after reshaping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Anthropic,
    OpenAiCompatible,
    Gemini,
    Bedrock,
    VertexAi,
    Azure,
}

impl ProviderKind {
    /// Every provider kind, in the order adapters are tried when a caller
    /// asks for "any configured provider" (used by diagnostics, not by the
    /// orchestrator, which always receives an explicit provider name).
    pub fn all() -> [ProviderKind; 6] {
        [
            ProviderKind::Anthropic,
            ProviderKind::OpenAiCompatible,
            ProviderKind::Gemini,
            ProviderKind::Bedrock,
            ProviderKind::VertexAi,
            ProviderKind::Azure,
        ]
    }

    /// Whether this kind ultimately speaks Anthropic's Messages API wire
    /// format (directly, or reshaped through a cloud router).
    pub fn is_anthropic_family(self) -> bool {
        matches!(self, ProviderKind::Anthropic | ProviderKind::Bedrock)
    }

    /// Whether this kind ultimately speaks Gemini's wire format.
    pub fn is_gemini_family(self) -> bool {
        matches!(self, ProviderKind::Gemini | ProviderKind::VertexAi)
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::OpenAiCompatible => "openai_compatible",
            ProviderKind::Gemini => "gemini",
            ProviderKind::Bedrock => "bedrock",
            ProviderKind::VertexAi => "vertex_ai",
            ProviderKind::Azure => "azure",
        };
        f.write_str(s)
    }
}

/// Static metadata about one model, used to size thinking budgets and
/// detect context-limit errors ahead of sending a request.
#[derive(Debug, Clone)]
pub struct ModelDescriptor {
    pub id: String,
    pub context_window: u32,
    pub max_output_tokens: u32,
    pub supports_thinking: bool,
    pub supports_vision: bool,
}

impl ModelDescriptor {
    pub fn new(id: impl Into<String>, context_window: u32, max_output_tokens: u32) -> Self {
        Self {
            id: id.into(),
            context_window,
            max_output_tokens,
            supports_thinking: false,
            supports_vision: true,
        }
    }

    pub fn with_thinking(mut self) -> Self {
        self.supports_thinking = true;
        self
    }

    pub fn without_vision(mut self) -> Self {
        self.supports_vision = false;
        self
    }

    /// Trigger threshold for auto-summarization: `contextWindow * 0.9`.
    pub fn summarize_threshold_tokens(&self) -> usize {
        ((self.context_window as f64) * 0.9) as usize
    }
}

/// Look up static metadata for a known model id. Unknown ids (custom
/// deployments, new releases) fall back to a conservative default rather
/// than failing — the orchestrator still works, just without a precise
/// context-window estimate.
pub fn describe_model(kind: ProviderKind, model_id: &str) -> ModelDescriptor {
    for candidate in builtin_models(kind) {
        if candidate.id == model_id {
            return candidate;
        }
    }
    ModelDescriptor::new(model_id, 128_000, 8_192)
}

fn builtin_models(kind: ProviderKind) -> Vec<ModelDescriptor> {
    match kind {
        ProviderKind::Anthropic | ProviderKind::Bedrock => vec![
            ModelDescriptor::new("claude-opus-4-6", 200_000, 32_000).with_thinking(),
            ModelDescriptor::new("claude-sonnet-4-6", 200_000, 64_000).with_thinking(),
            ModelDescriptor::new("claude-haiku-4-5-20251001", 200_000, 16_000).with_thinking(),
        ],
        ProviderKind::Gemini | ProviderKind::VertexAi => vec![
            ModelDescriptor::new("gemini-2.5-pro", 1_048_576, 65_536).with_thinking(),
            ModelDescriptor::new("gemini-2.5-flash", 1_048_576, 65_536).with_thinking(),
        ],
        ProviderKind::OpenAiCompatible | ProviderKind::Azure => vec![
            ModelDescriptor::new("gpt-5.3-codex", 272_000, 128_000).with_thinking(),
            ModelDescriptor::new("gpt-5.3-mini", 272_000, 128_000),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_covers_every_variant() {
        assert_eq!(ProviderKind::all().len(), 6);
    }

    #[test]
    fn bedrock_is_anthropic_family() {
        assert!(ProviderKind::Bedrock.is_anthropic_family());
        assert!(!ProviderKind::Bedrock.is_gemini_family());
    }

    #[test]
    fn vertex_is_gemini_family() {
        assert!(ProviderKind::VertexAi.is_gemini_family());
    }

    #[test]
    fn describe_known_model_returns_real_context_window() {
        let d = describe_model(ProviderKind::Anthropic, "claude-opus-4-6");
        assert_eq!(d.context_window, 200_000);
        assert!(d.supports_thinking);
    }

    #[test]
    fn describe_unknown_model_falls_back() {
        let d = describe_model(ProviderKind::OpenAiCompatible, "some-custom-deploy");
        assert_eq!(d.context_window, 128_000);
    }

    #[test]
    fn summarize_threshold_is_ninety_percent() {
        let d = ModelDescriptor::new("x", 100_000, 8_000);
        assert_eq!(d.summarize_threshold_tokens(), 90_000);
    }

    #[test]
    fn kind_round_trips_through_serde() {
        let s = serde_json::to_string(&ProviderKind::VertexAi).unwrap();
        assert_eq!(s, "\"vertex_ai\"");
        let back: ProviderKind = serde_json::from_str(&s).unwrap();
        assert_eq!(back, ProviderKind::VertexAi);
    }
}
