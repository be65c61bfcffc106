//! Model-backed translator.
//!
//! Delegates to an OpenAI-compatible chat-completions endpoint constrained
//! to emit JSON only, with zero temperature for determinism. Its output gets
//! no more trust than the rule translator's: it is a candidate for the
//! validator, nothing else. Transport or parse failures degrade to the
//! empty filter so the pipeline's failure surface stays in the validator.

use super::{empty_candidate, QueryTranslator};
use crate::catalog::FieldCatalog;
use crate::config::ModelSettings;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

pub struct ModelTranslator {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
    system_prompt: String,
}

impl std::fmt::Debug for ModelTranslator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelTranslator")
            .field("api_url", &self.api_url)
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

impl ModelTranslator {
    pub fn new(settings: &ModelSettings, catalog: &FieldCatalog) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: settings.api_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
            model: settings.model.clone(),
            system_prompt: system_prompt(catalog),
        }
    }

    async fn request_candidate(&self, query: &str) -> Result<Value> {
        let url = format!("{}/chat/completions", self.api_url);
        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": self.system_prompt },
                { "role": "user", "content": query }
            ],
            "temperature": 0,
            "max_tokens": 500,
            "response_format": { "type": "json_object" }
        });

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .context("Failed to send translation request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("Model API error ({}): {}", status, body));
        }

        let data: ChatResponse = response
            .json()
            .await
            .context("Failed to parse chat completion response")?;
        let content = data
            .choices
            .first()
            .map(|choice| choice.message.content.as_str())
            .context("Chat completion carried no choices")?;

        serde_json::from_str(content).context("Model output was not valid JSON")
    }
}

#[async_trait]
impl QueryTranslator for ModelTranslator {
    async fn translate(&self, text: &str) -> Result<Value> {
        match self.request_candidate(text).await {
            Ok(candidate) => Ok(candidate),
            Err(error) => {
                tracing::warn!(error = %error, "model translation failed, falling back to empty filter");
                Ok(empty_candidate())
            }
        }
    }

    fn name(&self) -> &'static str {
        "model"
    }
}

/// Fixed instruction enumerating the allowlist, with one worked example.
/// The field list comes from the catalog so prompt and validator cannot
/// drift apart.
fn system_prompt(catalog: &FieldCatalog) -> String {
    format!(
        r#"You are a stock screener DSL generator. Convert natural language queries to DSL JSON.

STRICT RULES:
- Return ONLY valid JSON, no explanations
- Use this exact structure: {{ "filter": {{ "and": [...] }} }}
- Allowed fields: {}
- Allowed operators: <, >, <=, >=, =, !=, between, in, exists
- If the query cannot be expressed, return {{ "filter": {{}} }}
- Example: "PE < 15 and ROE > 20" becomes:
{{
  "filter": {{
    "and": [
      {{ "field": "pe_ratio", "operator": "<", "value": 15 }},
      {{ "field": "roe", "operator": ">", "value": 20 }}
    ]
  }}
}}"#,
        catalog.logical_names().join(", ")
    )
}

#[cfg(test)]
pub(super) fn test_translator(api_url: &str) -> ModelTranslator {
    let settings = ModelSettings {
        api_url: api_url.to_string(),
        api_key: "test-key".to_string(),
        model: "test-model".to_string(),
    };
    ModelTranslator::new(&settings, &FieldCatalog::load())
}
