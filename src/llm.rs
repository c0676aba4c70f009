use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::CoreConfig;
use crate::error::{CoreError, Result};

static CLIENT: OnceCell<reqwest::blocking::Client> = OnceCell::new();

fn http_client(timeout: Duration) -> Result<&'static reqwest::blocking::Client> {
    CLIENT.get_or_try_init(|| {
        reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| CoreError::LlmUnavailable(format!("build http client: {err}")))
    })
}

/// The only outbound boundary of the parser: prompt in, text completion
/// out. Implementations must not interpret the text.
pub trait LlmClient: Send + Sync {
    fn complete(&self, prompt: &str) -> Result<String>;
}

/// Completion-endpoint client. The endpoint accepts a JSON body with
/// model, prompt and generation parameters and returns
/// `{"completion": "..."}`.
pub struct HttpLlmClient {
    endpoint: String,
    model: String,
    temperature: f64,
    max_tokens: u32,
    timeout: Duration,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    temperature: f64,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct CompletionResponse {
    completion: String,
}

impl HttpLlmClient {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>, config: &CoreConfig) -> Self {
        Self {
            endpoint: endpoint.into(),
            model: model.into(),
            temperature: config.llm_temperature,
            max_tokens: config.llm_max_tokens,
            timeout: config.llm_timeout(),
        }
    }
}

impl LlmClient for HttpLlmClient {
    fn complete(&self, prompt: &str) -> Result<String> {
        let client = http_client(self.timeout)?;
        let body = CompletionRequest {
            model: &self.model,
            prompt,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        debug!(endpoint = %self.endpoint, prompt_len = prompt.len(), "llm request");
        let response = client
            .post(self.endpoint.as_str())
            .json(&body)
            .send()
            .map_err(|err| {
                if err.is_timeout() {
                    CoreError::Timeout {
                        stage: "language model",
                        waited_ms: self.timeout.as_millis() as u64,
                    }
                } else {
                    CoreError::LlmUnavailable(err.to_string())
                }
            })?;

        if !response.status().is_success() {
            return Err(CoreError::LlmUnavailable(format!(
                "endpoint returned {}",
                response.status()
            )));
        }

        let parsed: CompletionResponse = response
            .json()
            .map_err(|err| CoreError::LlmUnavailable(format!("malformed response: {err}")))?;
        Ok(parsed.completion)
    }
}

/// Deterministic stand-in for tests and offline runs: answers from a
/// queue of canned completions, then reports the endpoint unavailable.
#[derive(Default)]
pub struct ScriptedClient {
    responses: Mutex<VecDeque<String>>,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_responses<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
        }
    }

    pub fn push(&self, response: impl Into<String>) {
        self.responses
            .lock()
            .expect("scripted responses lock")
            .push_back(response.into());
    }
}

impl LlmClient for ScriptedClient {
    fn complete(&self, _prompt: &str) -> Result<String> {
        self.responses
            .lock()
            .expect("scripted responses lock")
            .pop_front()
            .ok_or_else(|| CoreError::LlmUnavailable("no scripted response queued".into()))
    }
}
