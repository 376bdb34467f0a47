//! Reasoning service over an OpenAI-compatible chat-completions API.
//!
//! Each [`ReasoningRequest`] becomes one `POST {base_url}/chat/completions`
//! with a system message (persona + instruction) and a user message (context
//! + transcript). Some models only accept the default temperature; when the
//! provider says so the client retries once at 1.0 and keeps that setting for
//! every later call.
//!
//! When a completion reports `usage`, the call's cost is priced from
//! [`UsageRates`], logged as a `reasoning.usage` event and added to
//! [`METRICS`]. The client also keeps its own running cost total.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use marksim_core::{
    emit_reasoning_usage, CollabResult, CollaboratorError, ReasoningRequest, ReasoningService,
    TokenUsage, METRICS,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{classify, parse_base_url, status_error, AdapterConfigError, Result};

const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_TEMPERATURE: f64 = 1.0;
const TEMPERATURE_REJECTED: &str = "Only the default (1) value";
const DEFAULT_INPUT_USD_PER_MTOKEN: f64 = 0.15;
const DEFAULT_OUTPUT_USD_PER_MTOKEN: f64 = 0.60;

/// Prices per million tokens, in USD.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UsageRates {
    pub input_usd_per_mtoken: f64,
    pub output_usd_per_mtoken: f64,
}

impl Default for UsageRates {
    fn default() -> Self {
        UsageRates {
            input_usd_per_mtoken: DEFAULT_INPUT_USD_PER_MTOKEN,
            output_usd_per_mtoken: DEFAULT_OUTPUT_USD_PER_MTOKEN,
        }
    }
}

impl UsageRates {
    /// Rates from `OPENAI_RATE_INPUT_USD_PER_MTOKEN` and
    /// `OPENAI_RATE_OUTPUT_USD_PER_MTOKEN`, falling back to the defaults.
    pub fn from_env() -> Self {
        let rate = |key: &str, default: f64| {
            std::env::var(key)
                .ok()
                .and_then(|raw| raw.trim().parse::<f64>().ok())
                .filter(|r| r.is_finite() && *r >= 0.0)
                .unwrap_or(default)
        };
        UsageRates {
            input_usd_per_mtoken: rate(
                "OPENAI_RATE_INPUT_USD_PER_MTOKEN",
                DEFAULT_INPUT_USD_PER_MTOKEN,
            ),
            output_usd_per_mtoken: rate(
                "OPENAI_RATE_OUTPUT_USD_PER_MTOKEN",
                DEFAULT_OUTPUT_USD_PER_MTOKEN,
            ),
        }
    }

    pub fn cost_usd(&self, usage: &TokenUsage) -> f64 {
        (usage.prompt_tokens as f64 * self.input_usd_per_mtoken
            + usage.completion_tokens as f64 * self.output_usd_per_mtoken)
            / 1_000_000.0
    }
}

/// Reasoning service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningConfig {
    /// API base, e.g. `https://api.openai.com/v1`
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f64,
    /// Per-request timeout
    pub timeout: Duration,
    pub rates: UsageRates,
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        ReasoningConfig {
            base_url: std::env::var("OPENAI_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            api_key: std::env::var("OPENAI_API_KEY").ok(),
            model: std::env::var("MARKSIM_LLM_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string()),
            temperature: std::env::var("MARKSIM_LLM_TEMPERATURE")
                .ok()
                .and_then(|raw| raw.trim().parse().ok())
                .unwrap_or(DEFAULT_TEMPERATURE),
            timeout: Duration::from_secs(120),
            rates: UsageRates::from_env(),
        }
    }
}

impl ReasoningConfig {
    /// Create a new config from environment variables
    pub fn from_env() -> Self {
        Self::default()
    }

    pub fn new(base_url: &str, api_key: &str) -> Self {
        ReasoningConfig {
            base_url: base_url.to_string(),
            api_key: Some(api_key.to_string()),
            model: DEFAULT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            timeout: Duration::from_secs(120),
            rates: UsageRates::default(),
        }
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_rates(mut self, rates: UsageRates) -> Self {
        self.rates = rates;
        self
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f64,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<TokenUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

/// System and user message text for `request`.
pub fn render_messages(request: &ReasoningRequest) -> (String, String) {
    let system = format!(
        "You are {}. {}",
        request.role.persona(),
        request.instruction
    );
    let user = if request.transcript.is_empty() {
        request.context.clone()
    } else {
        format!(
            "{}\n\n[Conversation so far]\n{}",
            request.context, request.transcript
        )
    };
    (system, user)
}

pub struct OpenAiReasoningService {
    base_url: String,
    api_key: String,
    model: String,
    /// `f64` bits; lowered to the default once the provider rejects it.
    temperature: AtomicU64,
    timeout: Duration,
    rates: UsageRates,
    /// Running cost of every call made by this client, in nano-dollars.
    spent_nanos: AtomicU64,
    http_client: reqwest::Client,
}

struct Completion {
    text: String,
    usage: Option<TokenUsage>,
}

enum Attempt {
    Done(CollabResult<Completion>),
    TemperatureRejected,
}

impl OpenAiReasoningService {
    pub fn new(config: ReasoningConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .filter(|k| !k.trim().is_empty())
            .ok_or(AdapterConfigError::MissingApiKey)?;
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("marksim-adapters/", env!("CARGO_PKG_VERSION")))
            .timeout(config.timeout)
            .build()?;
        Ok(OpenAiReasoningService {
            base_url: parse_base_url(&config.base_url)?,
            api_key,
            model: config.model,
            temperature: AtomicU64::new(config.temperature.to_bits()),
            timeout: config.timeout,
            rates: config.rates,
            spent_nanos: AtomicU64::new(0),
            http_client,
        })
    }

    /// Create client from environment variables
    pub fn from_env() -> Result<Self> {
        Self::new(ReasoningConfig::from_env())
    }

    pub fn temperature(&self) -> f64 {
        f64::from_bits(self.temperature.load(Ordering::Relaxed))
    }

    /// Cost of every call this client has made so far, in USD.
    pub fn total_cost_usd(&self) -> f64 {
        self.spent_nanos.load(Ordering::Relaxed) as f64 / 1e9
    }

    fn record_usage(&self, request: &ReasoningRequest, usage: &TokenUsage) {
        let cost = self.rates.cost_usd(usage);
        let nanos = (cost * 1e9).round() as u64;
        let total = self.spent_nanos.fetch_add(nanos, Ordering::Relaxed) + nanos;
        METRICS.record_usage(usage, cost);
        emit_reasoning_usage(
            &request.role.to_string(),
            &self.model,
            usage,
            cost,
            total as f64 / 1e9,
        );
    }

    async fn attempt(&self, system: &str, user: &str, temperature: f64) -> Attempt {
        let body = ChatRequest {
            model: &self.model,
            temperature,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
        };
        let timeout_ms = self.timeout.as_millis() as u64;
        let response = match self
            .http_client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => return Attempt::Done(Err(classify(e, timeout_ms))),
        };

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            if text.contains("temperature") && text.contains(TEMPERATURE_REJECTED) {
                return Attempt::TemperatureRejected;
            }
            return Attempt::Done(Err(status_error(status, &text)));
        }

        let parsed = match response.json::<ChatResponse>().await {
            Ok(p) => p,
            Err(e) => return Attempt::Done(Err(classify(e, timeout_ms))),
        };
        let usage = parsed.usage;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());
        Attempt::Done(Ok(Completion {
            text: content.unwrap_or_default(),
            usage,
        }))
    }
}

#[async_trait]
impl ReasoningService for OpenAiReasoningService {
    async fn invoke(&self, request: ReasoningRequest) -> CollabResult<String> {
        let (system, user) = render_messages(&request);
        debug!(role = %request.role, model = %self.model, "chat completion");

        let temperature = self.temperature();
        let completion = match self.attempt(&system, &user, temperature).await {
            Attempt::Done(result) => result,
            Attempt::TemperatureRejected if temperature != DEFAULT_TEMPERATURE => {
                warn!(
                    model = %self.model,
                    temperature = temperature,
                    "model rejected temperature; forcing 1.0"
                );
                self.temperature
                    .store(DEFAULT_TEMPERATURE.to_bits(), Ordering::Relaxed);
                match self.attempt(&system, &user, DEFAULT_TEMPERATURE).await {
                    Attempt::Done(result) => result,
                    Attempt::TemperatureRejected => Err(CollaboratorError::Http(
                        "temperature rejected at the default value".to_string(),
                    )),
                }
            }
            Attempt::TemperatureRejected => Err(CollaboratorError::Http(
                "temperature rejected at the default value".to_string(),
            )),
        }?;

        // usage is recorded even when the reply is empty
        if let Some(usage) = &completion.usage {
            self.record_usage(&request, usage);
        }
        if completion.text.is_empty() {
            return Err(CollaboratorError::InvalidResponse(
                "completion has no message content".to_string(),
            ));
        }
        Ok(completion.text)
    }
}
