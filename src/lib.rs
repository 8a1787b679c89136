//! Long Poll client primitives for VK push-update endpoints.
//!
//! The client owns one session (server URL, key, `ts` cursor and optional
//! `pts` checkpoint) and exposes a single blocking operation,
//! [`LongPollClient::fetch`], which issues one `a_check` request, reacts to
//! the server's `failed` codes and returns the delivered updates.
//!
//! Session credentials come from a pluggable [`CredentialProvider`]. The
//! default [`ApiCredentialProvider`] calls an upstream API method such as
//! `groups.getLongPollServer` through a [`RequestExecutor`].
//!
//! There is no background polling loop: callers invoke `fetch` repeatedly
//! and decide how to pace the calls.

pub mod client;
pub mod config;
pub mod context;
pub mod credentials;
pub mod error;
pub mod parse;
pub mod session;
pub mod url;

pub use client::LongPollClient;
pub use config::{LongPollConfig, Mode, PollOptions};
pub use context::Context;
pub use credentials::{
    ApiCredentialProvider, ApiRequest, CredentialProvider, FnCredentialProvider, RequestExecutor,
    ReqwestExecutor,
};
pub use error::{ErrorKind, LongPollError};
pub use parse::{parse_response, FailureSignal, PollResponse, Update};
pub use session::SessionState;
pub use crate::url::normalize_server_url;
