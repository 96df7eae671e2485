//! PaCoRe streaming connector
//!
//! Executes chat requests against a PaCoRe-family upstream and re-emits the
//! response as Claude stream events. The upstream speaks OpenAI-shaped SSE
//! whose text payload interleaves `<thinking>`/`<tool_call>` markup; a
//! dedicated reader task feeds each frame through the transcoder and forwards
//! the resulting events over a bounded channel. Dropping the receiver cancels
//! the request: sends fail, the task exits, and the upstream body is released.
//!
//! Each request records one usage detail into the shared statistics store,
//! keyed by `(provider, model)`.

use crate::client::{create_client, HttpClientConfig};
use crate::{EgressError, Result};
use chrono::Utc;
use eventsource_stream::EventStream;
use futures::StreamExt;
use prismroute_core::events::StreamEvent;
use prismroute_translate::PacoreTranscoder;
use prismroute_usage::{RequestDetail, RequestStatistics, TokenStats};
use reqwest::Client;
use std::sync::Arc;
use tokio::sync::mpsc;

/// PaCoRe connector configuration
#[derive(Debug, Clone)]
pub struct PacoreConfig {
    /// Base URL of the upstream (the connector appends `/chat/completions`)
    pub base_url: String,

    /// Bearer token; empty sends no Authorization header
    pub api_key: String,

    /// Provider key used for usage accounting and detail source labels
    pub provider: String,

    /// Credential slot recorded on usage details
    pub auth_index: i32,

    /// HTTP client configuration
    pub client_config: HttpClientConfig,
}

impl PacoreConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            provider: "pacore".to_string(),
            auth_index: 0,
            client_config: HttpClientConfig::default(),
        }
    }
}

/// Connector to a PaCoRe upstream
pub struct PacoreConnector {
    client: Client,
    config: PacoreConfig,
    stats: Option<Arc<RequestStatistics>>,
}

/// What a finished upstream stream observed
#[derive(Debug, Default, Clone, Copy)]
struct StreamOutcome {
    tokens: TokenStats,
    failed: bool,
}

impl PacoreConnector {
    pub fn new(config: PacoreConfig) -> Result<Self> {
        let client = create_client(&config.client_config)?;
        Ok(Self {
            client,
            config,
            stats: None,
        })
    }

    /// Attach a statistics store; every request records one detail into it
    pub fn with_stats(mut self, stats: Arc<RequestStatistics>) -> Self {
        self.stats = Some(stats);
        self
    }

    /// Execute a streaming chat request.
    ///
    /// `request` is the OpenAI-shaped request body. Returns a channel of
    /// downstream events; the upstream is read by a background task for the
    /// lifetime of the receiver.
    pub async fn stream_chat(
        &self,
        request: serde_json::Value,
    ) -> Result<mpsc::Receiver<Result<StreamEvent>>> {
        let model = request
            .get("model")
            .and_then(|m| m.as_str())
            .unwrap_or_default()
            .to_string();

        let url = format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );

        let mut builder = self
            .client
            .post(&url)
            .header("Accept", "text/event-stream")
            .header("Cache-Control", "no-cache")
            .json(&request);
        if !self.config.api_key.is_empty() {
            builder = builder.bearer_auth(&self.config.api_key);
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(err) => {
                self.record(&model, TokenStats::default(), true);
                return Err(err.into());
            }
        };

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            tracing::debug!(status = %status, "upstream request failed");
            self.record(&model, TokenStats::default(), true);
            return Err(EgressError::Provider {
                status_code: status.as_u16(),
                message,
            });
        }

        // Reference behavior is an unbuffered handoff to the consumer.
        let (tx, rx) = mpsc::channel(1);

        let stats = self.stats.clone();
        let provider = self.config.provider.clone();
        let auth_index = self.config.auth_index;
        tokio::spawn(async move {
            let events = Box::pin(EventStream::new(response.bytes_stream()));
            let outcome = pump_sse_stream(events, &model, &tx).await;
            record_outcome(stats.as_deref(), &provider, auth_index, &model, outcome);
        });

        Ok(rx)
    }

    fn record(&self, model: &str, tokens: TokenStats, failed: bool) {
        record_outcome(
            self.stats.as_deref(),
            &self.config.provider,
            self.config.auth_index,
            model,
            StreamOutcome { tokens, failed },
        );
    }
}

/// Drive one SSE stream through a transcoder, forwarding events to `tx`.
///
/// Skips the `[DONE]` sentinel, harvests OpenAI `usage` objects along the way,
/// and finalizes the transcoder when the upstream ends without a finish
/// reason. A closed receiver ends the pump early.
async fn pump_sse_stream<S, E>(
    mut events: S,
    model: &str,
    tx: &mpsc::Sender<Result<StreamEvent>>,
) -> StreamOutcome
where
    S: futures::Stream<
            Item = std::result::Result<
                eventsource_stream::Event,
                eventsource_stream::EventStreamError<E>,
            >,
        > + Unpin,
    E: std::fmt::Display,
{
    let mut transcoder = PacoreTranscoder::new(model);
    let mut tokens = TokenStats::default();

    while let Some(item) = events.next().await {
        match item {
            Ok(event) => {
                if event.data == "[DONE]" {
                    continue;
                }
                if let Some(parsed) = parse_stream_usage(&event.data) {
                    tokens = parsed;
                }
                for out in transcoder.transcode(&event.data) {
                    if tx.send(Ok(out)).await.is_err() {
                        tracing::debug!("downstream consumer gone, abandoning stream");
                        return StreamOutcome { tokens, failed: false };
                    }
                }
            }
            Err(err) => {
                let _ = tx.send(Err(EgressError::Stream(err.to_string()))).await;
                return StreamOutcome {
                    tokens,
                    failed: true,
                };
            }
        }
    }

    if !transcoder.is_finished() {
        for out in transcoder.finalize(None) {
            if tx.send(Ok(out)).await.is_err() {
                break;
            }
        }
    }

    StreamOutcome {
        tokens,
        failed: false,
    }
}

fn record_outcome(
    stats: Option<&RequestStatistics>,
    provider: &str,
    auth_index: i32,
    model: &str,
    outcome: StreamOutcome,
) {
    let Some(stats) = stats else {
        return;
    };
    let detail = RequestDetail {
        timestamp: Utc::now(),
        source: provider.to_string(),
        auth_index,
        tokens: outcome.tokens,
        failed: outcome.failed,
    };
    if outcome.failed {
        stats.record_failure(provider, model, detail);
    } else {
        stats.record(provider, model, detail);
    }
}

/// Extract token usage from an OpenAI-shaped stream chunk, if present
fn parse_stream_usage(data: &str) -> Option<TokenStats> {
    let json: serde_json::Value = serde_json::from_str(data).ok()?;
    let usage = json.get("usage")?;
    if usage.is_null() {
        return None;
    }

    let mut tokens = TokenStats {
        input_tokens: usage.get("prompt_tokens").and_then(|t| t.as_u64())?,
        output_tokens: usage
            .get("completion_tokens")
            .and_then(|t| t.as_u64())
            .unwrap_or(0),
        ..TokenStats::default()
    };
    tokens.total_tokens = usage
        .get("total_tokens")
        .and_then(|t| t.as_u64())
        .unwrap_or(tokens.input_tokens + tokens.output_tokens);

    // Reasoning and cache counts live in the details objects on newer models.
    if let Some(reasoning) = usage
        .pointer("/completion_tokens_details/reasoning_tokens")
        .and_then(|t| t.as_u64())
    {
        tokens.reasoning_tokens = reasoning;
    }
    if let Some(cached) = usage
        .pointer("/prompt_tokens_details/cached_tokens")
        .and_then(|t| t.as_u64())
    {
        tokens.cached_tokens = cached;
    }

    Some(tokens)
}
