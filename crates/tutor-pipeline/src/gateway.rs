//! Model gateway: one interface over the vision and text model endpoints.
//!
//! [`ModelGateway`] is the seam the orchestrator talks to. [`HttpGateway`]
//! implements it against OpenAI-style chat-completions endpoints, in both
//! the synchronous and the streaming form. Failures are normalized into
//! [`GatewayError`]; there are no retries at this layer.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::config::{Config, ModelEndpoint};
use crate::decoder::decode_stream;
use crate::error::{GatewayError, GatewayErrorKind, Result, TutorError};
use crate::event::{EventStream, StreamEvent};
use crate::input::ImagePayload;
use crate::prompts::StageParams;

/// Deadline used when a request does not set one.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Longest slice of an error body kept in [`GatewayError::detail`].
const MAX_ERROR_BODY_CHARS: usize = 512;

/// Which model endpoint a request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    /// The image-capable model.
    Vision,
    /// The text model.
    Text,
}

impl std::fmt::Display for Modality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Vision => write!(f, "vision"),
            Self::Text => write!(f, "text"),
        }
    }
}

/// One model call.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    /// Target endpoint.
    pub modality: Modality,
    /// Optional system instruction.
    pub system: Option<String>,
    /// User prompt.
    pub prompt: String,
    /// Image sent alongside the prompt (vision only).
    pub image: Option<ImagePayload>,
    /// Sampling temperature.
    pub temperature: f64,
    /// Completion token ceiling.
    pub max_tokens: u32,
    /// Deadline for the call. Streaming applies it to the handshake only.
    pub timeout: Duration,
}

impl ModelRequest {
    /// Creates a text-modality request.
    #[must_use]
    pub fn text(prompt: impl Into<String>, params: StageParams) -> Self {
        Self {
            modality: Modality::Text,
            system: None,
            prompt: prompt.into(),
            image: None,
            temperature: params.temperature,
            max_tokens: params.max_tokens,
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Creates a vision-modality request carrying an image.
    #[must_use]
    pub fn vision(prompt: impl Into<String>, image: ImagePayload, params: StageParams) -> Self {
        Self {
            modality: Modality::Vision,
            image: Some(image),
            ..Self::text(prompt, params)
        }
    }

    /// Sets the system instruction.
    #[must_use]
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Sets the call deadline.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Access to the generative models.
#[async_trait]
pub trait ModelGateway: Send + Sync {
    /// Returns the complete model text.
    ///
    /// # Errors
    ///
    /// Returns a [`GatewayError`] on timeout, transport failure, non-success
    /// status, or a response without a completion.
    async fn invoke(&self, request: ModelRequest) -> std::result::Result<String, GatewayError>;

    /// Returns a lazy stream of fragments ending in `Done` or `Error`.
    ///
    /// Nothing is sent upstream until the stream is first polled; dropping
    /// the stream closes the upstream connection. The request timeout bounds
    /// opening the stream and each wait for the next fragment.
    fn invoke_streaming(&self, request: ModelRequest) -> EventStream;
}

/// Resolved endpoint with its credential.
#[derive(Clone)]
struct Route {
    url: String,
    api_key: String,
    model: String,
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("url", &self.url)
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .finish()
    }
}

impl Route {
    fn new(endpoint: &ModelEndpoint, api_key: String) -> Self {
        Self {
            url: endpoint.api_url.clone(),
            api_key,
            model: endpoint.model.clone(),
        }
    }
}

/// [`ModelGateway`] over HTTP chat-completions endpoints.
#[derive(Debug, Clone)]
pub struct HttpGateway {
    client: reqwest::Client,
    vision: Route,
    text: Route,
    enable_thinking: bool,
}

impl HttpGateway {
    /// Builds a gateway from configuration.
    ///
    /// Either endpoint may omit its API key; it then borrows the other one.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigValidationError` if no API key is configured at all
    /// or the HTTP client cannot be created.
    pub fn new(config: &Config) -> Result<Self> {
        let key = |endpoint: &ModelEndpoint| {
            endpoint
                .api_key
                .as_deref()
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(str::to_string)
        };
        let text_key = key(&config.text);
        let vision_key = key(&config.vision);

        let (Some(text_key), Some(vision_key)) = (
            text_key.clone().or_else(|| vision_key.clone()),
            vision_key.or(text_key),
        ) else {
            return Err(TutorError::config_validation(
                "no model API key configured",
                "Set text.apiKey in tutor.json or export TUTOR_TEXT_API_KEY",
            ));
        };

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| {
                TutorError::config_validation(
                    format!("cannot create HTTP client: {e}"),
                    "Check the TLS configuration of this machine",
                )
            })?;

        Ok(Self {
            client,
            vision: Route::new(&config.vision, vision_key),
            text: Route::new(&config.text, text_key),
            enable_thinking: config.enable_thinking,
        })
    }

    const fn route(&self, modality: Modality) -> &Route {
        match modality {
            Modality::Vision => &self.vision,
            Modality::Text => &self.text,
        }
    }

    /// Builds the chat-completions request body.
    fn request_body(&self, request: &ModelRequest, stream: bool) -> Value {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &request.system {
            messages.push(json!({ "role": "system", "content": system }));
        }
        let content = match &request.image {
            Some(image) => json!([
                { "type": "text", "text": request.prompt },
                { "type": "image_url", "image_url": { "url": image.to_data_url() } },
            ]),
            None => Value::String(request.prompt.clone()),
        };
        messages.push(json!({ "role": "user", "content": content }));

        let mut body = json!({
            "model": self.route(request.modality).model,
            "messages": messages,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
            "stream": stream,
        });
        if self.enable_thinking && request.modality == Modality::Text {
            body["thinking"] = json!({ "type": "enabled" });
        }
        body
    }

    async fn exchange(&self, request: &ModelRequest) -> std::result::Result<Value, GatewayError> {
        let route = self.route(request.modality);
        let response = self
            .client
            .post(&route.url)
            .bearer_auth(&route.api_key)
            .json(&self.request_body(request, false))
            .send()
            .await
            .map_err(map_send_error)?;
        let response = ensure_success(response).await?;

        response.json::<Value>().await.map_err(|e| {
            if e.is_timeout() {
                GatewayError::timeout(format!("reading response body: {e}"))
            } else if e.is_decode() {
                GatewayError::malformed(format!("response body is not JSON: {e}"))
            } else {
                GatewayError::transport(format!("reading response body: {e}"))
            }
        })
    }
}

#[async_trait]
impl ModelGateway for HttpGateway {
    async fn invoke(&self, request: ModelRequest) -> std::result::Result<String, GatewayError> {
        let started = Instant::now();
        let route = self.route(request.modality);
        debug!(modality = %request.modality, model = %route.model, "Invoking model");

        let response = tokio::time::timeout(request.timeout, self.exchange(&request))
            .await
            .map_err(|_| {
                GatewayError::timeout(format!(
                    "no response within {}s",
                    request.timeout.as_secs_f32()
                ))
            })??;

        let text = completion_text(&response)
            .ok_or_else(|| GatewayError::malformed("response has no choices[0].message.content"))?;

        info!(
            modality = %request.modality,
            model = %route.model,
            elapsed_ms = started.elapsed().as_millis(),
            chars = text.chars().count(),
            "Model call completed"
        );
        Ok(text)
    }

    fn invoke_streaming(&self, request: ModelRequest) -> EventStream {
        let route = self.route(request.modality).clone();
        let body = self.request_body(&request, true);
        let client = self.client.clone();
        let modality = request.modality;
        let timeout = request.timeout;

        Box::pin(async_stream::stream! {
            debug!(%modality, model = %route.model, "Opening model stream");
            let send = client
                .post(&route.url)
                .bearer_auth(&route.api_key)
                .json(&body)
                .send();

            let open = async move {
                match send.await {
                    Ok(response) => ensure_success(response).await,
                    Err(e) => Err(map_send_error(e)),
                }
            };
            let response = match tokio::time::timeout(timeout, open).await {
                Err(_) => Err(GatewayError::timeout(format!(
                    "stream not opened within {}s",
                    timeout.as_secs_f32()
                ))),
                Ok(result) => result,
            };
            let response = match response {
                Ok(response) => response,
                Err(e) => {
                    warn!(%modality, kind = %e.kind, detail = %e.detail, "Model stream failed to open");
                    yield StreamEvent::error(stream_failure_message(&e));
                    return;
                }
            };

            // Each fragment must arrive within the request timeout.
            let mut events = decode_stream(response.bytes_stream());
            loop {
                match tokio::time::timeout(timeout, events.next()).await {
                    Ok(Some(event)) => yield event,
                    Ok(None) => return,
                    Err(_) => {
                        let e = GatewayError::timeout(format!(
                            "no fragment within {}s",
                            timeout.as_secs_f32()
                        ));
                        warn!(%modality, kind = %e.kind, detail = %e.detail, "Model stream stalled");
                        yield StreamEvent::error(stream_failure_message(&e));
                        return;
                    }
                }
            }
        })
    }
}

/// Extracts the completion text from a chat-completions response.
///
/// Uses `choices[0].message.content`, joining the text parts when the content
/// is an array, and falls back to `reasoning_content` when the content is
/// empty.
#[must_use]
pub fn completion_text(response: &Value) -> Option<String> {
    let message = response.pointer("/choices/0/message")?;

    let content = match message.get("content") {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Array(parts)) => parts
            .iter()
            .filter_map(|part| part.get("text").and_then(Value::as_str).or_else(|| part.as_str()))
            .collect(),
        _ => String::new(),
    };
    if !content.trim().is_empty() {
        return Some(content);
    }

    message
        .get("reasoning_content")
        .and_then(Value::as_str)
        .filter(|reasoning| !reasoning.trim().is_empty())
        .map(str::to_string)
}

fn map_send_error(e: reqwest::Error) -> GatewayError {
    if e.is_timeout() {
        GatewayError::timeout(format!("request timed out: {e}"))
    } else if e.is_connect() {
        GatewayError::transport(format!("connection error: {e}"))
    } else {
        GatewayError::transport(format!("failed to send request: {e}"))
    }
}

async fn ensure_success(
    response: reqwest::Response,
) -> std::result::Result<reqwest::Response, GatewayError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let body: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
    Err(GatewayError::transport(format!("HTTP {status}: {body}")))
}

/// Message for a stream that never opened, safe to show to end users.
const fn stream_failure_message(error: &GatewayError) -> &'static str {
    match error.kind {
        GatewayErrorKind::Timeout => "The model service timed out, please try again",
        GatewayErrorKind::Transport => "The model service is unavailable",
        GatewayErrorKind::MalformedResponse => "The model service returned an unexpected response",
    }
}
