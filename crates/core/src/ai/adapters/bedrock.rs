//! AWS Bedrock router: reshapes a request into Bedrock's Converse-style
//! envelope and delegates the actual wire format to [`super::anthropic`],
//! since every Bedrock-hosted model this crate targets is in the Anthropic
//! family (spec §3's `ProviderKind::Bedrock` is a router, not a leaf).

use async_trait::async_trait;

use super::anthropic::AnthropicAdapter;
use super::{AdapterRequest, EventStream, ProviderAdapter, ProviderError, ProviderResponse};
use crate::ai::providers::ModelDescriptor;

/// Bedrock authenticates with SigV4 rather than a bearer/`x-api-key`
/// header; the caller is expected to hand us a base URL that already routes
/// through a SigV4-signing proxy (the same pattern the teacher's HTTP
/// client uses for other signed-request providers), keeping this router
/// itself free of AWS SDK dependencies.
pub struct BedrockAdapter {
    inner: AnthropicAdapter,
}

impl BedrockAdapter {
    pub fn new(signed_base_url: String, api_key: String, model: ModelDescriptor) -> Self {
        Self {
            inner: AnthropicAdapter::new(api_key, Some(signed_base_url), model),
        }
    }
}

#[async_trait]
impl ProviderAdapter for BedrockAdapter {
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
