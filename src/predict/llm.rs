use std::time::Duration;

use serde_json::Value;
use tracing::warn;

use crate::config::{Config, LLM_RETRY_ATTEMPTS, LLM_TIMEOUT_SECS};
use crate::error::{backoff_delay, is_retriable_status, AppError, Result};

enum CallError {
    Retriable(AppError),
    Fatal(AppError),
}

/// Chat-completions client. One call per prediction task, 20 s deadline,
/// 429/502/503/504 and transport errors retried with jittered backoff.
pub struct LlmClient {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
}

impl LlmClient {
    pub fn new(cfg: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(LLM_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            url: cfg.llm_api_url.clone(),
            api_key: cfg.llm_api_key.clone(),
            model: cfg.llm_model.clone(),
        })
    }

    pub async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
            "temperature": 0.7,
        });

        let mut attempt = 0u32;
        loop {
            match self.call_once(&body).await {
                Ok(text) => return Ok(text),
                Err(CallError::Retriable(e)) if attempt + 1 < LLM_RETRY_ATTEMPTS => {
                    let delay = backoff_delay(attempt);
                    warn!(attempt = attempt + 1, "LLM call failed, retrying in {delay:?}: {e}");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(CallError::Retriable(e)) | Err(CallError::Fatal(e)) => return Err(e),
            }
        }
    }

    async fn call_once(&self, body: &Value) -> std::result::Result<String, CallError> {
        let resp = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| CallError::Retriable(e.into()))?;

        let status = resp.status();
        if !status.is_success() {
            let err = AppError::Llm(format!("endpoint returned {status}"));
            return if is_retriable_status(status) {
                Err(CallError::Retriable(err))
            } else {
                Err(CallError::Fatal(err))
            };
        }

        let payload: Value = resp
            .json()
            .await
            .map_err(|e| CallError::Retriable(e.into()))?;

        payload
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|a| a.first())
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|t| t.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| {
                CallError::Fatal(AppError::Llm("reply carried no message content".to_string()))
            })
    }
}
