//! Session acquisition.
//!
//! A [`CredentialProvider`] produces a fresh [`SessionState`]. The client
//! calls it when it has no session and once more whenever the server
//! reports the session as invalid. Providers never retry on their own.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::value::RawValue;
use tracing::debug;
use url::Url;

use crate::context::Context;
use crate::error::LongPollError;
use crate::parse::{optional_int, required_int};
use crate::session::SessionState;
use crate::url::{normalize_server_url, redacted, set_param};

/// Base URL for upstream API methods addressed by name.
pub const DEFAULT_API_BASE_URL: &str = "https://api.vk.com/method";

#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn acquire(&self, ctx: &Context) -> Result<SessionState, LongPollError>;
}

#[async_trait]
impl<T> CredentialProvider for Arc<T>
where
    T: CredentialProvider + ?Sized,
{
    async fn acquire(&self, ctx: &Context) -> Result<SessionState, LongPollError> {
        (**self).acquire(ctx).await
    }
}

/// Adapts an async closure into a [`CredentialProvider`].
pub struct FnCredentialProvider<F> {
    acquire: F,
}

impl<F> FnCredentialProvider<F> {
    pub fn new(acquire: F) -> Self {
        Self { acquire }
    }
}

#[async_trait]
impl<F, Fut> CredentialProvider for FnCredentialProvider<F>
where
    F: Fn(Context) -> Fut + Send + Sync,
    Fut: Future<Output = Result<SessionState, LongPollError>> + Send,
{
    async fn acquire(&self, ctx: &Context) -> Result<SessionState, LongPollError> {
        (self.acquire)(ctx.clone()).await
    }
}

/// An upstream API call: target URL plus ordered query parameters.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiRequest {
    url: Url,
    params: Vec<(String, String)>,
}

impl ApiRequest {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            params: Vec::new(),
        }
    }

    /// Address an API method by name under [`DEFAULT_API_BASE_URL`].
    pub fn method(name: &str) -> Result<Self, LongPollError> {
        Self::method_at(DEFAULT_API_BASE_URL, name)
    }

    pub fn method_at(base_url: &str, name: &str) -> Result<Self, LongPollError> {
        let raw = format!("{}/{}", base_url.trim_end_matches('/'), name.trim());
        let url = Url::parse(&raw)
            .map_err(|error| LongPollError::InvalidOptions(format!("invalid API URL {raw}: {error}")))?;
        Ok(Self::new(url))
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        set_param(&mut self.params, &name, value);
        self
    }

    pub fn access_token(self, token: impl Into<String>) -> Self {
        self.param("access_token", token)
    }

    pub fn api_version(self, version: impl Into<String>) -> Self {
        self.param("v", version)
    }

    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }

    /// Final URL with the URL's own query merged under the explicit params.
    pub fn to_url(&self) -> Url {
        let mut pairs: Vec<(String, String)> = self
            .url
            .query_pairs()
            .map(|(name, value)| (name.into_owned(), value.into_owned()))
            .collect();
        for (name, value) in &self.params {
            set_param(&mut pairs, name, value.clone());
        }

        let mut url = self.url.clone();
        if pairs.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(pairs);
        }
        url
    }
}

impl std::fmt::Debug for ApiRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiRequest")
            .field("url", &redacted(&self.to_url()))
            .finish()
    }
}

/// Executes upstream API requests and returns the raw response body.
#[async_trait]
pub trait RequestExecutor: Send + Sync {
    async fn do_request(
        &self,
        ctx: &Context,
        request: &ApiRequest,
    ) -> Result<Vec<u8>, LongPollError>;
}

/// [`RequestExecutor`] issuing plain GET requests with `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestExecutor {
    http: Client,
    timeout: Option<Duration>,
}

impl ReqwestExecutor {
    pub fn new() -> Result<Self, LongPollError> {
        let http = Client::builder()
            .build()
            .map_err(LongPollError::HttpClient)?;
        Ok(Self::with_client(http))
    }

    pub fn with_client(http: Client) -> Self {
        Self {
            http,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[async_trait]
impl RequestExecutor for ReqwestExecutor {
    async fn do_request(
        &self,
        ctx: &Context,
        request: &ApiRequest,
    ) -> Result<Vec<u8>, LongPollError> {
        crate::client::get_body(&self.http, request.to_url(), self.timeout, ctx).await
    }
}

/// Default provider: calls an upstream method such as
/// `groups.getLongPollServer` and reads `{response: {server, key, ts}}`.
#[derive(Debug, Clone)]
pub struct ApiCredentialProvider<E = ReqwestExecutor> {
    executor: E,
    request: ApiRequest,
}

impl ApiCredentialProvider<ReqwestExecutor> {
    pub fn new(request: ApiRequest) -> Result<Self, LongPollError> {
        Ok(Self::with_executor(ReqwestExecutor::new()?, request))
    }
}

impl<E> ApiCredentialProvider<E> {
    pub fn with_executor(executor: E, request: ApiRequest) -> Self {
        Self { executor, request }
    }

    pub fn request(&self) -> &ApiRequest {
        &self.request
    }
}

#[async_trait]
impl<E> CredentialProvider for ApiCredentialProvider<E>
where
    E: RequestExecutor,
{
    async fn acquire(&self, ctx: &Context) -> Result<SessionState, LongPollError> {
        debug!(request = ?self.request, "requesting long poll server credentials");
        let body = self.executor.do_request(ctx, &self.request).await?;
        parse_credentials(&body)
    }
}

#[derive(Deserialize)]
struct Envelope<'a> {
    #[serde(borrow, default)]
    response: Option<&'a RawValue>,
    #[serde(default)]
    error: Option<UpstreamError>,
}

#[derive(Deserialize)]
struct UpstreamError {
    #[serde(default)]
    error_code: Option<i64>,
    #[serde(default)]
    error_msg: Option<String>,
}

/// Decode a credential envelope into a session.
///
/// `server` gets an `https://` scheme when it has none; `ts` and the
/// optional `pts` follow the number-or-string rule.
pub fn parse_credentials(body: &[u8]) -> Result<SessionState, LongPollError> {
    let text = std::str::from_utf8(body)
        .map_err(|error| LongPollError::decode("body", format!("not valid UTF-8: {error}")))?;
    let envelope: Envelope<'_> = serde_json::from_str(text).map_err(|error| {
        LongPollError::decode("body", format!("expected a JSON object: {error}"))
    })?;

    let Some(response) = envelope.response else {
        let message = match envelope.error {
            Some(UpstreamError {
                error_code,
                error_msg,
            }) => format!(
                "missing; upstream error {}: {}",
                error_code.map_or_else(|| "n/a".to_owned(), |code| code.to_string()),
                error_msg.as_deref().unwrap_or("unknown error")
            ),
            None => "missing".to_owned(),
        };
        return Err(LongPollError::decode("response", message));
    };

    let fields: BTreeMap<String, &RawValue> = serde_json::from_str(response.get())
        .map_err(|_| LongPollError::decode("response", "expected a JSON object"))?;

    let key = required_string(&fields, "key")?;
    let server = required_string(&fields, "server")?;
    let server_url = normalize_server_url(&server)?;
    let cursor = required_int(&fields, "ts").map_err(in_envelope)?;
    let checkpoint = optional_int(&fields, "pts");

    Ok(SessionState::new(server_url, key, cursor).with_checkpoint(checkpoint))
}

fn required_string(
    fields: &BTreeMap<String, &RawValue>,
    name: &str,
) -> Result<String, LongPollError> {
    let raw = fields
        .get(name)
        .ok_or_else(|| LongPollError::decode(format!("response.{name}"), "missing"))?;
    serde_json::from_str::<String>(raw.get())
        .map_err(|_| LongPollError::decode(format!("response.{name}"), "expected a string"))
}

fn in_envelope(error: LongPollError) -> LongPollError {
    match error {
        LongPollError::Decode { field, message } => LongPollError::Decode {
            field: format!("response.{field}"),
            message,
        },
        other => other,
    }
}
