use crate::errors::LlmError;
use async_trait::async_trait;
use dbshift_types::models::config::LlmConfig;
use dbshift_types::serde::Deserialize;
use dbshift_types::serde_json::json;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

const OPENAI_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";

const SYSTEM_PROMPT: &str = "You are a database migration assistant. Given a source table \
    description, propose the best MySQL column type for every column. Respond with JSON only, \
    no prose, in the shape {\"columns\": [{\"source\": ..., \"target\": ..., \"target_type\": ..., \
    \"transform_hint\": ..., \"warning\": ...}]}.";

/// Contract with the mapping-proposal LLM. The pipeline treats the client as
/// an accelerator: every caller must be able to fall back to the rule-based
/// mapping when it misbehaves.
#[async_trait]
pub trait ProposalClient: Send + Sync {
    async fn propose(&self, prompt: &str) -> Result<String, LlmError>;
}

/// Token bucket limiting proposal requests per minute.
pub struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    state: tokio::sync::Mutex<(f64, Instant)>,
}

impl TokenBucket {
    pub fn per_minute(requests: u32) -> Self {
        let capacity = f64::from(requests.max(1));
        Self {
            capacity,
            refill_per_sec: capacity / 60.0,
            state: tokio::sync::Mutex::new((capacity, Instant::now())),
        }
    }

    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let (ref mut tokens, ref mut refilled_at) = *state;
                let elapsed = refilled_at.elapsed().as_secs_f64();
                *tokens = (*tokens + elapsed * self.refill_per_sec).min(self.capacity);
                *refilled_at = Instant::now();
                if *tokens >= 1.0 {
                    *tokens -= 1.0;
                    return;
                }
                Duration::from_secs_f64((1.0 - *tokens) / self.refill_per_sec)
            };
            tokio::time::sleep(wait).await;
        }
    }
}

/// HTTP client for OpenAI-compatible chat-completion providers.
pub struct HttpProposalClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    bucket: TokenBucket,
}

#[derive(Debug, Deserialize)]
#[serde(crate = "dbshift_types::serde")]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
#[serde(crate = "dbshift_types::serde")]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
#[serde(crate = "dbshift_types::serde")]
struct ChatMessage {
    content: String,
}

impl HttpProposalClient {
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let endpoint = match (config.endpoint.clone(), config.provider.as_str()) {
            (Some(endpoint), _) => endpoint,
            (None, "openai") => OPENAI_ENDPOINT.to_string(),
            (None, other) => return Err(LlmError::UnknownProvider(other.to_string())),
        };
        Ok(Self {
            http: reqwest::Client::new(),
            endpoint,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            bucket: TokenBucket::per_minute(config.requests_per_minute),
        })
    }
}

#[async_trait]
impl ProposalClient for HttpProposalClient {
    async fn propose(&self, prompt: &str) -> Result<String, LlmError> {
        self.bucket.acquire().await;
        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": prompt},
            ],
            "temperature": 0,
        });
        let response: ChatResponse = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| LlmError::MalformedResponse("empty choices".to_string()))
    }
}

/// Scripted client for tests: pops one canned response per call.
#[derive(Default)]
pub struct MockProposalClient {
    responses: Mutex<VecDeque<String>>,
    calls: Mutex<u32>,
}

impl MockProposalClient {
    pub fn with_responses(responses: impl IntoIterator<Item = String>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().collect()),
            calls: Mutex::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl ProposalClient for MockProposalClient {
    async fn propose(&self, _prompt: &str) -> Result<String, LlmError> {
        *self.calls.lock().unwrap() += 1;
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| LlmError::MalformedResponse("mock exhausted".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn token_bucket_allows_burst_up_to_capacity() {
        let bucket = TokenBucket::per_minute(120);
        let started = Instant::now();
        for _ in 0..5 {
            bucket.acquire().await;
        }
        assert!(started.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn mock_pops_in_order() {
        let mock = MockProposalClient::with_responses(["a".to_string(), "b".to_string()]);
        assert_eq!(mock.propose("x").await.unwrap(), "a");
        assert_eq!(mock.propose("x").await.unwrap(), "b");
        assert!(mock.propose("x").await.is_err());
        assert_eq!(mock.calls(), 3);
    }
}
