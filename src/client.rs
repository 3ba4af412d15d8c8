use std::error::Error as StdError;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::{Config, InvocationMode, ServiceTier};
use crate::eventstream::{Decoder, Message};
use crate::models::{GenerationParams, ModelFamily, Usage};
use crate::result::{ErrorKind, InvocationResult};
use crate::signing::SigV4Signer;

const EVENTSTREAM_CONTENT_TYPE: &str = "application/vnd.amazon.eventstream";
const BEDROCK_ACCEPT: HeaderName = HeaderName::from_static("x-amzn-bedrock-accept");
const SERVICE_TIER: HeaderName = HeaderName::from_static("x-amzn-bedrock-service-tier");
const ERROR_TYPE: &str = "x-amzn-errortype";

/// One inference call against the endpoint under test.
///
/// Implementations never return an error: every failure is folded into a
/// failed [`InvocationResult`] carrying its [`ErrorKind`].
#[async_trait]
pub trait InvocationClient: Send + Sync {
    async fn invoke(&self, prompt: &str, mode: InvocationMode) -> InvocationResult;
}

/// Builds a dedicated client for each worker.
pub trait ClientFactory: Send + Sync {
    fn build(&self) -> Result<Box<dyn InvocationClient>>;
}

#[derive(Clone, Debug)]
pub struct BedrockClientConfig {
    pub endpoint: Url,
    pub region: String,
    pub model_id: String,
    pub params: GenerationParams,
    pub service_tier: ServiceTier,
    pub request_timeout: Duration,
    pub headers: HeaderMap,
    /// SigV4 signing; requests carry a Bearer API key or nothing when unset.
    pub signer: Option<SigV4Signer>,
}

impl BedrockClientConfig {
    pub fn try_new(region: &str, model_id: impl Into<String>, api_key: Option<String>) -> Result<Self> {
        if region.is_empty() {
            return Err(anyhow!("region must not be empty"));
        }
        let endpoint = format!("https://bedrock-runtime.{}.amazonaws.com", region);
        let endpoint = Url::parse(&endpoint)
            .with_context(|| format!("invalid region for endpoint: {}", region))?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let config = Self {
            endpoint,
            region: region.to_string(),
            model_id: model_id.into(),
            params: GenerationParams {
                max_tokens: 512,
                temperature: 0.0,
            },
            service_tier: ServiceTier::Default,
            request_timeout: Duration::from_secs(600),
            headers,
            signer: None,
        };
        match api_key {
            Some(api_key) if !api_key.is_empty() => config.with_api_key(&api_key),
            _ => Ok(config),
        }
    }

    /// An explicit `api_key` wins; otherwise a static access key pair from the
    /// file selects SigV4. With neither, the caller picks a fallback.
    pub fn from_config(config: &Config, api_key: Option<String>) -> Result<Self> {
        let mut client = Self::try_new(&config.aws.region, config.model.id.clone(), api_key)?
            .with_generation(config.test.max_tokens, config.test.temperature)
            .with_service_tier(config.test.service_tier)
            .with_request_timeout(Duration::from_secs(config.test.request_timeout_seconds));
        if let Some(endpoint) = config.aws.endpoint.as_deref() {
            client = client.with_endpoint(endpoint)?;
        }
        if !client.is_authenticated() {
            if let Some((access_key_id, secret_access_key)) = config.aws.static_credentials() {
                let signer = SigV4Signer::from_keys(
                    &config.aws.region,
                    access_key_id,
                    secret_access_key,
                    config.aws.session_token.clone().filter(|token| !token.is_empty()),
                );
                client = client.with_sigv4(signer);
            }
        }
        Ok(client)
    }

    pub fn with_api_key(mut self, api_key: &str) -> Result<Self> {
        let auth_value = format!("Bearer {}", api_key);
        let header_value = HeaderValue::from_str(&auth_value)
            .context("failed to build Authorization header from api_key")?;
        self.headers.insert(AUTHORIZATION, header_value);
        self.signer = None;
        Ok(self)
    }

    pub fn with_sigv4(mut self, signer: SigV4Signer) -> Self {
        self.headers.remove(AUTHORIZATION);
        self.signer = Some(signer);
        self
    }

    /// Adds a header sent with every request.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn is_authenticated(&self) -> bool {
        self.signer.is_some() || self.headers.contains_key(AUTHORIZATION)
    }

    /// Signs with whatever the default AWS credential chain resolves for `region`.
    pub async fn with_default_credentials(self) -> Result<Self> {
        let signer = SigV4Signer::from_default_chain(self.region.clone()).await?;
        Ok(self.with_sigv4(signer))
    }

    pub fn with_endpoint(mut self, endpoint: &str) -> Result<Self> {
        self.endpoint =
            Url::parse(endpoint).with_context(|| format!("invalid endpoint URL: {}", endpoint))?;
        Ok(self)
    }

    pub fn with_generation(mut self, max_tokens: u32, temperature: f64) -> Self {
        self.params = GenerationParams {
            max_tokens,
            temperature,
        };
        self
    }

    pub fn with_service_tier(mut self, service_tier: ServiceTier) -> Self {
        self.service_tier = service_tier;
        self
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        if !request_timeout.is_zero() {
            self.request_timeout = request_timeout;
        }
        self
    }

    fn operation_url(&self, operation: &str) -> Result<Url> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("endpoint {} cannot carry a path", self.endpoint))?
            .pop_if_empty()
            .extend(["model", self.model_id.as_str(), operation]);
        Ok(url)
    }
}

impl ClientFactory for BedrockClientConfig {
    fn build(&self) -> Result<Box<dyn InvocationClient>> {
        Ok(Box::new(BedrockClient::new(self.clone())?))
    }
}

/// Per-request failure, folded into a failed [`InvocationResult`].
#[derive(Debug, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct InvokeFailure {
    pub kind: ErrorKind,
    pub status: Option<u16>,
    pub message: String,
}

impl InvokeFailure {
    fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status: None,
            message: message.into(),
        }
    }

    fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    fn transport(err: &reqwest::Error) -> Self {
        let text = error_chain(err);
        let kind = if err.is_timeout() {
            ErrorKind::TimeoutError
        } else {
            classify_error(&text)
        };
        Self::new(kind, text)
    }

    fn http(status: StatusCode, error_type: Option<&str>, body: &str) -> Self {
        let message = serde_json::from_str::<ErrorBody>(body)
            .ok()
            .and_then(|parsed| parsed.message)
            .unwrap_or_else(|| body.to_string());
        let text = format!("{} {}", error_type.unwrap_or_default(), message);
        let kind = match classify_error(&text) {
            ErrorKind::UnknownError => classify_status(status),
            kind => kind,
        };
        Self::new(kind, format!("{} ({}): {}", status, error_type.unwrap_or("-"), message))
            .with_status(status.as_u16())
    }

    fn stream(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::StreamError, message).with_status(200)
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default, alias = "Message")]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkEnvelope {
    bytes: String,
}

/// Classifies a failure by the words in its error text.
pub fn classify_error(text: &str) -> ErrorKind {
    let text = text.to_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|needle| text.contains(needle));

    if has(&["throttling", "too many"]) {
        ErrorKind::ThrottlingError
    } else if has(&["validation"]) {
        ErrorKind::ValidationError
    } else if has(&["access denied", "accessdenied"]) {
        ErrorKind::AccessDeniedError
    } else if has(&["not found", "notfound"]) {
        ErrorKind::ModelNotFoundError
    } else if has(&["service quota", "servicequota"]) {
        ErrorKind::QuotaExceededError
    } else if has(&["timeout", "timed out"]) {
        ErrorKind::TimeoutError
    } else {
        ErrorKind::UnknownError
    }
}

fn classify_status(status: StatusCode) -> ErrorKind {
    match status.as_u16() {
        429 => ErrorKind::ThrottlingError,
        400 => ErrorKind::ValidationError,
        403 => ErrorKind::AccessDeniedError,
        404 => ErrorKind::ModelNotFoundError,
        408 | 504 => ErrorKind::TimeoutError,
        _ => ErrorKind::UnknownError,
    }
}

fn error_chain(err: &dyn StdError) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        text.push_str(": ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    text
}

/// Bedrock runtime client speaking the per-family JSON dialects over HTTPS.
pub struct BedrockClient {
    http: Client,
    config: BedrockClientConfig,
    family: Option<ModelFamily>,
    invoke_url: Url,
    stream_url: Url,
}

impl BedrockClient {
    pub fn new(config: BedrockClientConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .context("failed to construct HTTP client")?;

        let family = ModelFamily::detect(&config.model_id);
        if family.is_none() {
            warn!(model = %config.model_id, "no request dialect for model; every call will fail");
        }

        Ok(Self {
            http,
            invoke_url: config.operation_url("invoke")?,
            stream_url: config.operation_url("invoke-with-response-stream")?,
            family,
            config,
        })
    }

    fn family_for(&self, mode: InvocationMode) -> Result<ModelFamily, InvokeFailure> {
        let family = self.family.ok_or_else(|| {
            InvokeFailure::new(
                ErrorKind::UnsupportedModel,
                format!("unsupported model: {}", self.config.model_id),
            )
        })?;
        if mode.is_streaming() && !family.supports_streaming() {
            return Err(InvokeFailure::new(
                ErrorKind::UnsupportedOperation,
                "streaming only supported for Claude, DeepSeek, Mistral, and Qwen models",
            ));
        }
        Ok(family)
    }

    async fn send(
        &self,
        family: ModelFamily,
        prompt: &str,
        mode: InvocationMode,
    ) -> Result<reqwest::Response, InvokeFailure> {
        let body = serde_json::to_vec(&family.request_body(prompt, self.config.params)).map_err(
            |err| {
                InvokeFailure::new(
                    ErrorKind::RequestPreparationError,
                    format!("failed to prepare request: {}", err),
                )
            },
        )?;

        let mut request = match mode {
            InvocationMode::NonStreaming => self
                .http
                .post(self.invoke_url.clone())
                .header(ACCEPT, "application/json"),
            InvocationMode::Streaming => {
                let mut request = self
                    .http
                    .post(self.stream_url.clone())
                    .header(ACCEPT, EVENTSTREAM_CONTENT_TYPE)
                    .header(BEDROCK_ACCEPT, "application/json");
                if self.config.service_tier != ServiceTier::Default {
                    request = request.header(SERVICE_TIER, self.config.service_tier.as_str());
                }
                request
            }
        };
        for (name, value) in self.config.headers.iter() {
            request = request.header(name, value);
        }

        let mut request = request.body(body).build().map_err(|err| {
            InvokeFailure::new(
                ErrorKind::RequestPreparationError,
                format!("failed to build request: {}", err),
            )
        })?;
        if let Some(signer) = &self.config.signer {
            signer.sign(&mut request).await.map_err(|err| {
                InvokeFailure::new(
                    ErrorKind::RequestPreparationError,
                    format!("failed to sign request: {:#}", err),
                )
            })?;
        }

        let response = self
            .http
            .execute(request)
            .await
            .map_err(|err| InvokeFailure::transport(&err))?;

        let status = response.status();
        if !status.is_success() {
            let error_type = response
                .headers()
                .get(ERROR_TYPE)
                .and_then(|value| value.to_str().ok())
                .map(|value| value.split(':').next().unwrap_or(value).to_string());
            let body = response.text().await.unwrap_or_default();
            return Err(InvokeFailure::http(status, error_type.as_deref(), &body));
        }

        Ok(response)
    }

    async fn invoke_blocking(&self, prompt: &str) -> Result<Usage, InvokeFailure> {
        let family = self.family_for(InvocationMode::NonStreaming)?;
        let response = self.send(family, prompt, InvocationMode::NonStreaming).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|err| InvokeFailure::transport(&err))?;

        family.parse_response(&bytes).map_err(|err| {
            InvokeFailure::new(
                ErrorKind::ResponseParseError,
                format!("failed to parse response: {}", err),
            )
            .with_status(200)
        })
    }

    async fn invoke_streaming(
        &self,
        prompt: &str,
        start: Instant,
    ) -> Result<(Usage, Option<Duration>), InvokeFailure> {
        let family = self.family_for(InvocationMode::Streaming)?;
        let response = self.send(family, prompt, InvocationMode::Streaming).await?;

        let mut bytes = response.bytes_stream();
        let mut decoder = Decoder::new();
        let mut usage = Usage::default();
        let mut ttft = None;

        while let Some(chunk) = bytes.next().await {
            let chunk = chunk.map_err(|err| InvokeFailure::stream(error_chain(&err)))?;
            decoder.push(&chunk);
            while let Some(message) = decoder
                .next_message()
                .map_err(|err| InvokeFailure::stream(err.to_string()))?
            {
                if apply_message(family, &message, &mut usage)? && ttft.is_none() {
                    ttft = Some(start.elapsed());
                }
            }
        }
        decoder
            .finish()
            .map_err(|err| InvokeFailure::stream(err.to_string()))?;

        Ok((usage, ttft))
    }
}

/// Returns whether the frame carried generated content.
fn apply_message(
    family: ModelFamily,
    message: &Message,
    usage: &mut Usage,
) -> Result<bool, InvokeFailure> {
    if matches!(message.message_type(), Some("exception") | Some("error")) {
        let detail = String::from_utf8_lossy(&message.payload);
        let kind = message
            .exception_type()
            .or_else(|| message.header_str(":error-code"))
            .unwrap_or("unknown");
        return Err(InvokeFailure::stream(format!("stream error: {}: {}", kind, detail)));
    }
    if message.event_type() != Some("chunk") {
        return Ok(false);
    }

    let envelope: ChunkEnvelope = serde_json::from_slice(&message.payload)
        .map_err(|err| InvokeFailure::stream(format!("malformed chunk envelope: {}", err)))?;
    let chunk = BASE64
        .decode(envelope.bytes.as_bytes())
        .map_err(|err| InvokeFailure::stream(format!("malformed chunk bytes: {}", err)))?;

    family.apply_chunk(&chunk, usage).map_err(|err| {
        InvokeFailure::new(
            ErrorKind::StreamParseError,
            format!("failed to parse stream event: {}", err),
        )
        .with_status(200)
    })
}

#[async_trait]
impl InvocationClient for BedrockClient {
    async fn invoke(&self, prompt: &str, mode: InvocationMode) -> InvocationResult {
        let start = Instant::now();
        let outcome = match mode {
            InvocationMode::NonStreaming => self.invoke_blocking(prompt).await.map(|usage| (usage, None)),
            InvocationMode::Streaming => self.invoke_streaming(prompt, start).await,
        };

        match outcome {
            Ok((usage, ttft)) => {
                InvocationResult::succeeded(start, usage.input_tokens, usage.output_tokens)
                    .with_ttft(ttft)
            }
            Err(failure) => {
                if failure.kind == ErrorKind::UnknownError {
                    warn!(status = ?failure.status, error = %failure.message, "unclassified invocation failure");
                } else {
                    debug!(kind = %failure.kind, status = ?failure.status, error = %failure.message, "invocation failed");
                }
                InvocationResult::failed(start, failure.kind, failure.message)
                    .with_status(failure.status)
            }
        }
    }
}
