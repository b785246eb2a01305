//! HTTP clients for the planner and classifier services.
//!
//! Both speak the OpenAI-compatible chat completions API; the classifier just
//! points at a different base URL and a cheap model. Transport errors are
//! anyhow errors; contract-level failures (bad labels, missing delimiter) are
//! raised by the callers that parse the text.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde_json::{json, Value};
use tokio::time::sleep;

use crate::config::AgentConfig;
use crate::memory::Role;
use crate::planner::{Classification, Classifier, PlanRequest, Planner};
use crate::prompts::CLASSIFIER_SYSTEM_PROMPT;

pub struct ChatCompletionsClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl ChatCompletionsClient {
    fn new(api_key: String, base_url: &str, model: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        })
    }

    /// Planner client. Reads `OPENAI_API_KEY`.
    pub fn planner(cfg: &AgentConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .context("OPENAI_API_KEY not set. Add it to the .env file in the project root")?;
        Self::new(api_key, &cfg.planner_api_base, &cfg.planner_model)
    }

    /// Classifier client. Reads `GROQ_API_KEY`.
    pub fn classifier(cfg: &AgentConfig) -> Result<Self> {
        let api_key = std::env::var("GROQ_API_KEY")
            .context("GROQ_API_KEY not set. Add it to the .env file in the project root")?;
        Self::new(api_key, &cfg.classifier_api_base, &cfg.classifier_model)
    }

    async fn post_with_retry(&self, body: &Value) -> Result<reqwest::Response> {
        let url = format!("{}/chat/completions", self.base_url);
        let max_retries = 3;
        let mut attempt = 0;
        let mut backoff = Duration::from_secs(1);

        loop {
            attempt += 1;
            match self
                .client
                .post(&url)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(body)
                .send()
                .await
            {
                Ok(resp) => {
                    let retryable = resp.status().is_server_error()
                        || resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS;
                    if !retryable || attempt > max_retries {
                        return Ok(resp);
                    }
                    tracing::warn!(status = %resp.status(), attempt, "retrying LLM request");
                }
                Err(e) => {
                    if attempt > max_retries {
                        return Err(anyhow::anyhow!("Max retries exceeded: {}", e));
                    }
                    tracing::warn!(error = %e, attempt, "LLM network error, retrying");
                }
            }
            sleep(backoff).await;
            backoff *= 2;
        }
    }

    async fn complete(&self, messages: Vec<Value>) -> Result<String> {
        let body = json!({
            "model": self.model,
            "messages": messages,
        });
        let resp = self.post_with_retry(&body).await?;
        if !resp.status().is_success() {
            let error_text = resp.text().await?;
            return Err(anyhow::anyhow!("LLM API error: {}", error_text));
        }
        let body: Value = resp.json().await?;
        match body["choices"][0]["message"]["content"].as_str() {
            Some(content) => Ok(content.to_string()),
            None => Err(anyhow::anyhow!(
                "No content in LLM response. Raw body: {}",
                serde_json::to_string(&body).unwrap_or_default()
            )),
        }
    }
}

fn metadata_text(request: &PlanRequest<'_>) -> String {
    let meta = request.metadata;
    format!(
        "Screenshot metadata: width={}, height={}, grid minor={}, major={}, scale={}. \
         Use these coordinates when generating action scripts.",
        meta.width, meta.height, meta.grid.minor, meta.grid.major, meta.scale
    )
}

#[async_trait]
impl Planner for ChatCompletionsClient {
    async fn plan(&self, request: PlanRequest<'_>) -> Result<String> {
        let image_b64 = base64::engine::general_purpose::STANDARD.encode(request.image_png);
        let image_data_url = format!("data:image/png;base64,{}", image_b64);

        let mut messages = vec![json!({
            "role": "system",
            "content": request.instructions,
        })];
        for turn in request.history {
            let role = match turn.role {
                Role::User => "user",
                Role::Assistant => "assistant",
            };
            messages.push(json!({ "role": role, "content": turn.content }));
        }
        let user_content = format!(
            "Classification: {}\n\nUser prompt: {}\n\n{}",
            request.classification.label(),
            request.user_text,
            metadata_text(&request),
        );
        messages.push(json!({
            "role": "user",
            "content": [
                { "type": "text", "text": user_content },
                { "type": "image_url", "image_url": { "url": image_data_url } },
            ],
        }));

        self.complete(messages).await
    }
}

#[async_trait]
impl Classifier for ChatCompletionsClient {
    async fn classify(&self, text: &str) -> Result<Classification> {
        let messages = vec![
            json!({ "role": "system", "content": CLASSIFIER_SYSTEM_PROMPT }),
            json!({ "role": "user", "content": text }),
        ];
        let raw = self.complete(messages).await?;
        Ok(Classification::from_label(&raw)?)
    }
}
