mod client;
pub(crate) mod schema;
pub(crate) mod types;

pub use schema::StructuredOutput;

use anyhow::{anyhow, Result};
use std::time::Duration;

use client::{OpenAiClient, OPENAI_API_URL};

// =============================================================================
// OpenAi
// =============================================================================

#[derive(Clone)]
pub struct OpenAi {
    api_key: String,
    model: String,
    base_url: Option<String>,
    timeout: Duration,
}

impl OpenAi {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            base_url: None,
            timeout: Duration::from_secs(60),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// HTTP-level timeout. Callers that need a hard deadline should still wrap
    /// the call in their own timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn client(&self) -> OpenAiClient {
        OpenAiClient::new(
            &self.api_key,
            self.base_url.as_deref().unwrap_or(OPENAI_API_URL),
            self.timeout,
        )
    }

    /// Chat completion constrained to `schema`; returns the raw JSON text so
    /// callers can apply their own validation.
    pub async fn structured_output(
        &self,
        system: &str,
        user: &str,
        schema_name: &str,
        schema: serde_json::Value,
    ) -> Result<String> {
        let request = types::StructuredRequest {
            model: self.model.clone(),
            messages: vec![
                types::WireMessage::system(system),
                types::WireMessage::user(user),
            ],
            temperature: types::supports_temperature(&self.model).then_some(0.0),
            response_format: types::ResponseFormat {
                format_type: "json_schema",
                json_schema: types::JsonSchemaFormat {
                    name: schema_name.to_string(),
                    strict: true,
                    schema,
                },
            },
        };

        self.client().structured_output(&request).await
    }

    /// Type-safe structured output extraction.
    pub async fn extract<T: StructuredOutput>(
        &self,
        system: &str,
        user: &str,
    ) -> Result<T> {
        let raw = self
            .structured_output(system, user, &T::schema_name_for_openai(), T::openai_schema())
            .await?;
        serde_json::from_str(crate::util::strip_code_blocks(&raw))
            .map_err(|e| anyhow!("Failed to deserialize response: {}", e))
    }
}
