use std::fmt;

use url::Url;

/// Everything needed to address the next `a_check` request.
///
/// `Debug` output masks the key.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionState {
    pub server_url: Url,
    pub key: String,
    /// Position up to which updates were delivered (`ts`).
    pub cursor: i64,
    /// Secondary position marker (`pts`), when the server reports one.
    pub checkpoint: Option<i64>,
}

impl SessionState {
    pub fn new(server_url: Url, key: impl Into<String>, cursor: i64) -> Self {
        Self {
            server_url,
            key: key.into(),
            cursor,
            checkpoint: None,
        }
    }

    pub fn with_checkpoint(mut self, checkpoint: Option<i64>) -> Self {
        self.checkpoint = checkpoint;
        self
    }
}

impl fmt::Debug for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionState")
            .field("server_url", &crate::url::redacted(&self.server_url))
            .field("key", &"***")
            .field("cursor", &self.cursor)
            .field("checkpoint", &self.checkpoint)
            .finish()
    }
}
