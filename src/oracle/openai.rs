//! OpenAI-compatible chat-completions backend

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use super::traits::{OracleContext, OracleVerdict, VisualOracle};
use crate::config::OracleConfig;
use crate::detect::Region;
use crate::Error;

/// Vision model judging crops through `/chat/completions`
pub struct OpenAiOracle {
    api_url: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for OpenAiOracle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiOracle")
            .field("api_url", &self.api_url)
            .field("model", &self.model)
            .finish()
    }
}

impl OpenAiOracle {
    pub fn new(api_base: &str, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_url: format!("{}/chat/completions", api_base.trim_end_matches('/')),
            api_key: api_key.into(),
            model: model.into(),
            client: reqwest::Client::new(),
        }
    }

    /// Backend for the configured key; `None` when no key is set
    pub fn from_config(config: &OracleConfig) -> Option<Self> {
        config
            .api_key
            .as_deref()
            .filter(|key| !key.is_empty())
            .map(|key| Self::new(&config.api_base, key, config.model.clone()))
    }

    fn prompt(context: &OracleContext) -> String {
        let edge = match context.region {
            Region::Header => "top",
            Region::Footer => "bottom",
        };
        format!(
            "This image is the {edge} {height:.0}px of the web page {url} \
             (page height {page:.0}px, {pct:.1}% of the page). \
             Decide whether it contains the complete {region}: every row of navigation, \
             banners and branding for a header, or every link column, signup block and \
             legal line for a footer, with nothing cut off and no body content dominating. \
             Reply with JSON only: {{\"is_complete\": bool, \"confidence\": number between 0 and 1, \
             \"rationale\": short string}}.",
            edge = edge,
            height = context.candidate_height,
            url = context.url,
            page = context.page_height,
            pct = context.page_percentage(),
            region = context.region,
        )
    }

    fn request_body(&self, image_png: &[u8], context: &OracleContext) -> Value {
        let image = base64::engine::general_purpose::STANDARD.encode(image_png);
        json!({
            "model": self.model,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": Self::prompt(context) },
                    { "type": "image_url", "image_url": { "url": format!("data:image/png;base64,{}", image) } }
                ]
            }]
        })
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
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
struct RawVerdict {
    #[serde(alias = "complete", alias = "isComplete")]
    is_complete: bool,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default, alias = "reason", alias = "reasoning")]
    rationale: Option<String>,
}

/// Pull a JSON object out of a model reply: the whole text, a fenced block,
/// or the outermost braces
pub(crate) fn extract_json(text: &str) -> Option<Value> {
    let text = text.trim();
    if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(text) {
        return Some(value);
    }

    if let Some(start) = text.find("```") {
        let rest = &text[start + 3..];
        let rest = rest.strip_prefix("json").unwrap_or(rest);
        if let Some(end) = rest.find("```") {
            if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(rest[..end].trim()) {
                return Some(value);
            }
        }
    }

    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str::<Value>(&text[start..=end]) {
        Ok(value @ Value::Object(_)) => Some(value),
        _ => None,
    }
}

/// Read a verdict from model output
pub(crate) fn parse_verdict(text: &str) -> Result<OracleVerdict, Error> {
    let value = extract_json(text)
        .ok_or_else(|| Error::oracle_unavailable(format!("No JSON object in reply: {:.120}", text)))?;

    let raw: RawVerdict = serde_json::from_value(value)
        .map_err(|e| Error::oracle_unavailable(format!("Unreadable verdict: {}", e)))?;

    Ok(OracleVerdict::new(
        raw.is_complete,
        raw.confidence.unwrap_or(0.0),
        raw.rationale.unwrap_or_default(),
    ))
}

#[async_trait]
impl VisualOracle for OpenAiOracle {
    fn name(&self) -> &str {
        &self.model
    }

    async fn judge(&self, image_png: &[u8], context: &OracleContext) -> Result<OracleVerdict, Error> {
        debug!(
            "Asking {} about {} candidate of {:.0}px",
            self.model, context.region, context.candidate_height
        );

        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&self.request_body(image_png, context))
            .send()
            .await
            .map_err(|e| Error::oracle_unavailable(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(Error::oracle_unavailable(format!("HTTP {}: {:.200}", status, text)));
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| Error::oracle_unavailable(format!("Invalid response body: {}", e)))?;

        let content = chat
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| Error::oracle_unavailable("Empty completion"))?;

        parse_verdict(&content)
    }
}
