//! Per-call poll options and startup configuration.

use std::env;
use std::iter::Sum;
use std::ops::BitOr;
use std::time::Duration;

use crate::error::LongPollError;

/// Default time the server may hold one `a_check` request open.
pub const DEFAULT_WAIT: Duration = Duration::from_secs(90);
/// Default Long Poll protocol version.
pub const DEFAULT_VERSION: u32 = 3;
/// Default slack added on top of `wait` before the HTTP request times out.
pub const DEFAULT_TIMEOUT_GRACE: Duration = Duration::from_secs(15);
/// Default response key holding the updates array.
pub const DEFAULT_UPDATES_KEY: &str = "updates";

/// Bitmask of additional response details requested via `mode`.
///
/// Flags are independent and summable; `Mode::default()` requests nothing
/// and omits the parameter from the request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Mode(u32);

impl Mode {
    pub const NONE: Mode = Mode(0);
    /// Include attachments.
    pub const ATTACHMENTS: Mode = Mode(2);
    /// Extended event set.
    pub const EXTENDED: Mode = Mode(8);
    /// Return `pts` for later state sync.
    pub const RETURN_PTS: Mode = Mode(32);
    /// Return `$extra` fields.
    pub const EXTRA_FIELDS: Mode = Mode(64);
    /// Return `random_id`.
    pub const RETURN_RANDOM_ID: Mode = Mode(128);

    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[must_use]
    pub const fn contains(self, other: Mode) -> bool {
        self.0 & other.0 == other.0
    }

    /// Add up all given modes.
    pub fn sum(modes: impl IntoIterator<Item = Mode>) -> Mode {
        modes.into_iter().sum()
    }
}

impl Sum for Mode {
    fn sum<I: Iterator<Item = Mode>>(iter: I) -> Self {
        Mode(iter.fold(0u32, |acc, mode| acc.wrapping_add(mode.0)))
    }
}

impl BitOr for Mode {
    type Output = Mode;

    fn bitor(self, rhs: Mode) -> Mode {
        Mode(self.0 | rhs.0)
    }
}

/// Settings for one `fetch` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollOptions {
    /// How long the server may hold the request; sent as whole seconds.
    pub wait: Duration,
    pub mode: Mode,
    pub version: u32,
    /// Query overrides applied after every other parameter, last write wins.
    pub extra_params: Vec<(String, String)>,
    /// Keys leading to the updates array in the response object.
    pub updates_path: Vec<String>,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            wait: DEFAULT_WAIT,
            mode: Mode::NONE,
            version: DEFAULT_VERSION,
            extra_params: Vec::new(),
            updates_path: vec![DEFAULT_UPDATES_KEY.to_owned()],
        }
    }
}

impl PollOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_wait(mut self, wait: Duration) -> Self {
        self.wait = wait;
        self
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_modes(mut self, modes: impl IntoIterator<Item = Mode>) -> Self {
        self.mode = Mode::sum(modes);
        self
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn insert_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        crate::url::set_param(&mut self.extra_params, &key, value);
        self
    }

    pub fn with_params(
        mut self,
        params: impl IntoIterator<Item = (String, String)>,
    ) -> Self {
        for (key, value) in params {
            crate::url::set_param(&mut self.extra_params, &key, value);
        }
        self
    }

    pub fn with_updates_path<I, S>(mut self, path: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.updates_path = path.into_iter().map(Into::into).collect();
        self
    }

    /// Wait interval as sent in the `wait` query parameter.
    #[must_use]
    pub fn wait_secs(&self) -> u64 {
        self.wait.as_secs()
    }

    pub fn validate(&self) -> Result<(), LongPollError> {
        if self.version == 0 {
            return Err(LongPollError::InvalidOptions(
                "version must be positive".to_owned(),
            ));
        }
        if self.updates_path.is_empty() {
            return Err(LongPollError::InvalidOptions(
                "updates path must contain at least one key".to_owned(),
            ));
        }
        if self.updates_path.iter().any(|key| key.is_empty()) {
            return Err(LongPollError::InvalidOptions(
                "updates path keys must be non-empty".to_owned(),
            ));
        }
        if self.extra_params.iter().any(|(key, _)| key.trim().is_empty()) {
            return Err(LongPollError::InvalidOptions(
                "extra parameter names must be non-empty".to_owned(),
            ));
        }
        Ok(())
    }
}

/// Startup configuration handed to [`crate::LongPollClient::new`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LongPollConfig {
    /// Options used by `fetch` when the caller passes none.
    pub default_options: PollOptions,
    /// Added to `wait` to form the HTTP timeout of a poll request.
    pub timeout_grace: Duration,
}

impl Default for LongPollConfig {
    fn default() -> Self {
        Self {
            default_options: PollOptions::default(),
            timeout_grace: DEFAULT_TIMEOUT_GRACE,
        }
    }
}

impl LongPollConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `VK_LONGPOLL_WAIT_SECS`, `VK_LONGPOLL_MODE`,
    /// `VK_LONGPOLL_VERSION` and `VK_LONGPOLL_TIMEOUT_GRACE_SECS`.
    /// Unset, blank or unparsable values keep the default.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(secs) = env_u64("VK_LONGPOLL_WAIT_SECS") {
            config.default_options.wait = Duration::from_secs(secs);
        }
        if let Some(bits) = env_u64("VK_LONGPOLL_MODE").and_then(|v| u32::try_from(v).ok()) {
            config.default_options.mode = Mode::from_bits(bits);
        }
        if let Some(version) = env_u64("VK_LONGPOLL_VERSION").and_then(|v| u32::try_from(v).ok())
        {
            config.default_options.version = version;
        }
        if let Some(secs) = env_u64("VK_LONGPOLL_TIMEOUT_GRACE_SECS") {
            config.timeout_grace = Duration::from_secs(secs);
        }
        config
    }

    pub fn with_default_options(mut self, options: PollOptions) -> Self {
        self.default_options = options;
        self
    }

    pub fn with_timeout_grace(mut self, grace: Duration) -> Self {
        self.timeout_grace = grace;
        self
    }
}

fn env_u64(key: &str) -> Option<u64> {
    env_string_opt(key).and_then(|value| value.trim().parse().ok())
}

fn env_string_opt(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        if value.trim().is_empty() {
            None
        } else {
            Some(value)
        }
    })
}
