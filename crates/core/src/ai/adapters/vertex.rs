//! Google Vertex AI router: delegates to [`super::gemini`]'s wire format
//! after routing through a Vertex-hosted endpoint (spec §3's
//! `ProviderKind::VertexAi` is a router onto the Gemini model family, not a
//! leaf adapter).

use async_trait::async_trait;

use super::gemini::GeminiAdapter;
use super::{AdapterRequest, EventStream, ProviderAdapter, ProviderError, ProviderResponse};
use crate::ai::providers::ModelDescriptor;

/// Vertex authenticates with a GCP OAuth2 bearer token rather than Gemini's
/// API-key query parameter; the caller supplies a base URL already pointed
/// at the project/region-scoped Vertex endpoint and a bearer token in place
/// of an API key.
pub struct VertexAdapter {
    inner: GeminiAdapter,
}

impl VertexAdapter {
    pub fn new(vertex_base_url: String, bearer_token: String, model: ModelDescriptor) -> Self {
        Self {
            inner: GeminiAdapter::with_bearer_auth(bearer_token, vertex_base_url, model),
        }
    }
}

#[async_trait]
impl ProviderAdapter for VertexAdapter {
    fn model(&self) -> &ModelDescriptor {
        self.inner.model()
    }

    async fn send(&self, request: &AdapterRequest) -> Result<ProviderResponse, ProviderError> {
        self.inner.send(request).await
    }

    async fn stream(&self, request: &AdapterRequest) -> Result<EventStream, ProviderError> {
        self.inner.stream(request).await
    }
}
