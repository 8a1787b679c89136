use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::{LongPollConfig, PollOptions};
use crate::context::Context;
use crate::credentials::CredentialProvider;
use crate::error::LongPollError;
use crate::parse::{parse_response, FailureSignal, PollResponse, Update};
use crate::session::SessionState;
use crate::url::{redacted, set_param};

/// Long Poll client owning exactly one session.
///
/// `fetch` calls on one instance run strictly one after another: a caller
/// arriving while a cycle is in flight waits for it to finish and then runs
/// its own full cycle. Consuming one feed concurrently requires separate
/// clients with separate sessions.
pub struct LongPollClient {
    http: Client,
    config: LongPollConfig,
    provider: Option<Arc<dyn CredentialProvider>>,
    session: Mutex<Option<SessionState>>,
}

impl std::fmt::Debug for LongPollClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LongPollClient")
            .field("config", &self.config)
            .field("has_provider", &self.provider.is_some())
            .finish_non_exhaustive()
    }
}

impl LongPollClient {
    pub fn new(config: LongPollConfig) -> Result<Self, LongPollError> {
        let http = Client::builder()
            .build()
            .map_err(LongPollError::HttpClient)?;
        Ok(Self::with_http_client(http, config))
    }

    pub fn with_http_client(http: Client, config: LongPollConfig) -> Self {
        Self {
            http,
            config,
            provider: None,
            session: Mutex::new(None),
        }
    }

    pub fn with_credential_provider<P>(self, provider: P) -> Self
    where
        P: CredentialProvider + 'static,
    {
        self.with_shared_provider(Arc::new(provider))
    }

    pub fn with_shared_provider(mut self, provider: Arc<dyn CredentialProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Start from a known session instead of acquiring one on first use.
    pub fn with_session(mut self, session: SessionState) -> Self {
        self.session = Mutex::new(Some(session));
        self
    }

    pub fn config(&self) -> &LongPollConfig {
        &self.config
    }

    /// Snapshot of the current session. Waits for an in-flight `fetch`.
    pub async fn session(&self) -> Option<SessionState> {
        self.session.lock().await.clone()
    }

    pub async fn cursor(&self) -> Option<i64> {
        self.session.lock().await.as_ref().map(|session| session.cursor)
    }

    /// Last `pts` reported by the server, if the latest response had one.
    pub async fn checkpoint(&self) -> Option<i64> {
        self.session
            .lock()
            .await
            .as_ref()
            .and_then(|session| session.checkpoint)
    }

    /// Forget the session; the next `fetch` acquires a new one.
    pub async fn reset(&self) {
        self.session.lock().await.take();
    }

    /// Run one poll cycle with the configured default options.
    pub async fn fetch(&self, ctx: &Context) -> Result<Vec<Update>, LongPollError> {
        self.fetch_with(ctx, &self.config.default_options).await
    }

    /// Run one poll cycle: ensure a session, issue `a_check`, react to
    /// `failed` and commit the new cursor.
    ///
    /// The session is only written after a response has been parsed, so a
    /// cancelled or failed call leaves it as it was.
    pub async fn fetch_with(
        &self,
        ctx: &Context,
        options: &PollOptions,
    ) -> Result<Vec<Update>, LongPollError> {
        options.validate()?;
        let mut guard = ctx.run("long poll session lock", self.session.lock()).await?;

        // A session acquired here is only stored together with the first
        // parsed cursor.
        let session = match guard.as_ref() {
            Some(session) => session.clone(),
            None => self.acquire(ctx).await?,
        };

        let url = poll_url(&session, options);
        let target = redacted(&url);
        debug!(
            url = %target,
            cursor = session.cursor,
            wait_secs = options.wait_secs(),
            "issuing long poll request"
        );

        let timeout = options.wait.saturating_add(self.config.timeout_grace);
        let body = get_body(&self.http, url, Some(timeout), ctx).await?;

        match parse_response(&body, &options.updates_path)? {
            PollResponse::SessionInvalid { code } => {
                warn!(code, "long poll session invalidated, re-acquiring");
                let fresh = self.acquire(ctx).await?;
                *guard = Some(fresh);
                Ok(Vec::new())
            }
            PollResponse::VersionRejected => Err(LongPollError::VersionRejected {
                version: options.version,
                url: target,
            }),
            PollResponse::Updates {
                failure,
                cursor,
                checkpoint,
                updates,
            } => {
                if let FailureSignal::Unrecognized(code) = failure {
                    warn!(code, "unrecognized long poll failure code, continuing");
                }
                if cursor < session.cursor {
                    warn!(
                        previous = session.cursor,
                        cursor, "server moved the long poll cursor backwards"
                    );
                    return Err(LongPollError::decode(
                        "ts",
                        format!(
                            "cursor moved backwards from {} to {cursor}",
                            session.cursor
                        ),
                    ));
                }

                debug!(
                    cursor,
                    checkpoint = ?checkpoint,
                    updates = updates.len(),
                    "long poll cycle committed"
                );
                *guard = Some(SessionState {
                    cursor,
                    checkpoint,
                    ..session
                });
                Ok(updates)
            }
        }
    }

    async fn acquire(&self, ctx: &Context) -> Result<SessionState, LongPollError> {
        let provider = self
            .provider
            .as_ref()
            .ok_or(LongPollError::MissingCredentialProvider)?;
        let session = ctx
            .run("credential provider", provider.acquire(ctx))
            .await??;
        info!(
            server = %redacted(&session.server_url),
            cursor = session.cursor,
            "long poll session acquired"
        );
        Ok(session)
    }
}

/// Build the `a_check` URL for `session`.
///
/// Query pairs already present on the server URL are kept; the protocol
/// parameters replace same-named pairs, and `extra_params` are applied
/// last so they override everything.
pub fn poll_url(session: &SessionState, options: &PollOptions) -> Url {
    let mut params: Vec<(String, String)> = session
        .server_url
        .query_pairs()
        .map(|(name, value)| (name.into_owned(), value.into_owned()))
        .collect();

    set_param(&mut params, "key", session.key.as_str());
    set_param(&mut params, "ts", session.cursor.to_string());
    set_param(&mut params, "act", "a_check");
    set_param(&mut params, "wait", options.wait_secs().to_string());
    set_param(&mut params, "version", options.version.to_string());
    if !options.mode.is_empty() {
        set_param(&mut params, "mode", options.mode.bits().to_string());
    }
    for (name, value) in &options.extra_params {
        set_param(&mut params, name, value.as_str());
    }

    let mut url = session.server_url.clone();
    url.query_pairs_mut().clear().extend_pairs(params);
    url
}

/// GET `url` under `ctx` and return the body of a successful response.
pub(crate) async fn get_body(
    http: &Client,
    url: Url,
    timeout: Option<Duration>,
    ctx: &Context,
) -> Result<Vec<u8>, LongPollError> {
    let target = redacted(&url);
    let mut request = http.get(url);
    if let Some(timeout) = timeout {
        request = request.timeout(timeout);
    }

    let response = ctx
        .run(&target, request.send())
        .await?
        .map_err(|error| LongPollError::request(&target, error))?;
    let status = response.status();
    let body = ctx
        .run(&target, response.bytes())
        .await?
        .map_err(|error| LongPollError::request(&target, error))?;

    if !status.is_success() {
        return Err(LongPollError::Status {
            url: target,
            status,
            body: String::from_utf8_lossy(&body).trim().to_owned(),
        });
    }

    Ok(body.to_vec())
}

#[cfg(test)]
mod tests {
    use super::poll_url;
    use crate::config::{Mode, PollOptions};
    use crate::session::SessionState;
    use std::time::Duration;
    use url::Url;

    fn session() -> SessionState {
        let url = Url::parse("https://lp.example.com/wh42?flag=1").expect("url");
        SessionState::new(url, "secret", 1700)
    }

    #[test]
    fn poll_url_carries_protocol_params() {
        let url = poll_url(&session(), &PollOptions::default());
        assert_eq!(
            url.as_str(),
            "https://lp.example.com/wh42?flag=1&key=secret&ts=1700&act=a_check&wait=90&version=3"
        );
    }

    #[test]
    fn poll_url_includes_mode_only_when_nonzero() {
        let options = PollOptions::default()
            .with_wait(Duration::from_millis(25_900))
            .with_modes([Mode::ATTACHMENTS, Mode::RETURN_PTS]);
        let url = poll_url(&session(), &options);
        assert!(url.as_str().ends_with("wait=25&version=3&mode=34"));
    }

    #[test]
    fn poll_url_extra_params_override_protocol_params() {
        let options = PollOptions::default()
            .insert_param("ts", "1")
            .insert_param("act", "custom")
            .insert_param("lang", "en");
        let url = poll_url(&session(), &options);
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        assert!(pairs.contains(&("ts".to_owned(), "1".to_owned())));
        assert!(pairs.contains(&("act".to_owned(), "custom".to_owned())));
        assert!(pairs.contains(&("lang".to_owned(), "en".to_owned())));
        assert_eq!(pairs.iter().filter(|(k, _)| k == "ts").count(), 1);
    }
}
