//! Extraction of `failed`, `ts`, `pts` and the updates array from a poll
//! response body.
//!
//! Servers encode `ts` and `pts` either as JSON numbers or as numeric
//! strings, sometimes both within one deployment. Both fields are decoded
//! number-first, then string. A missing or malformed `ts` fails the whole
//! response; a missing or malformed `pts` is reported as absent.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::DeserializeOwned;
use serde_json::value::RawValue;
use serde_json::Value;

use crate::error::LongPollError;

/// One update exactly as delivered, as JSON text.
///
/// String updates keep their quotes, so every entry is itself valid JSON.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Update(String);

impl Update {
    pub fn from_json_text(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    pub fn into_string(self) -> String {
        self.0
    }

    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::from_str(&self.0)
    }

    /// Decode the update into a caller-defined event type.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.0)
    }
}

impl AsRef<str> for Update {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Update {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Meaning of the `failed` response field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureSignal {
    /// `failed` absent or zero.
    None,
    /// Codes 2 (key expired) and 3 (session lost): a new session is needed.
    SessionInvalid(i64),
    /// Code 4: the requested protocol version is not accepted.
    VersionRejected,
    /// Any other nonzero code; treated like `None`.
    Unrecognized(i64),
}

impl FailureSignal {
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => Self::None,
            2 | 3 => Self::SessionInvalid(code),
            4 => Self::VersionRejected,
            other => Self::Unrecognized(other),
        }
    }

    pub fn code(self) -> i64 {
        match self {
            Self::None => 0,
            Self::SessionInvalid(code) | Self::Unrecognized(code) => code,
            Self::VersionRejected => 4,
        }
    }
}

/// Outcome of parsing one poll response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollResponse {
    /// Regular response; `failure` is `None` or `Unrecognized`.
    Updates {
        failure: FailureSignal,
        cursor: i64,
        checkpoint: Option<i64>,
        updates: Vec<Update>,
    },
    /// The session must be re-acquired; nothing else in the body is used.
    SessionInvalid { code: i64 },
    VersionRejected,
}

type Fields<'a> = BTreeMap<String, &'a RawValue>;

pub fn parse_response(
    body: &[u8],
    updates_path: &[String],
) -> Result<PollResponse, LongPollError> {
    let text = std::str::from_utf8(body)
        .map_err(|error| LongPollError::decode("body", format!("not valid UTF-8: {error}")))?;
    let fields: Fields<'_> = serde_json::from_str(text).map_err(|error| {
        LongPollError::decode("body", format!("expected a JSON object: {error}"))
    })?;

    let failure = FailureSignal::from_code(failure_code(&fields));
    match failure {
        FailureSignal::SessionInvalid(code) => return Ok(PollResponse::SessionInvalid { code }),
        FailureSignal::VersionRejected => return Ok(PollResponse::VersionRejected),
        FailureSignal::None | FailureSignal::Unrecognized(_) => {}
    }

    let cursor = required_int(&fields, "ts")?;
    let checkpoint = optional_int(&fields, "pts");
    let updates = match updates_at(&fields, updates_path)? {
        Some(updates) => updates,
        // `failed=1` style responses carry only a fresh `ts`.
        None if matches!(failure, FailureSignal::Unrecognized(_)) => Vec::new(),
        None => {
            return Err(LongPollError::decode(
                display_path(updates_path),
                "missing from response",
            ))
        }
    };

    Ok(PollResponse::Updates {
        failure,
        cursor,
        checkpoint,
        updates,
    })
}

/// Read an `i64` encoded as a JSON integer or as a numeric JSON string.
pub fn int_from_number_or_string(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number.as_i64(),
        Value::String(text) => text.parse().ok(),
        _ => None,
    }
}

pub(crate) fn required_int(fields: &Fields<'_>, name: &str) -> Result<i64, LongPollError> {
    let raw = fields
        .get(name)
        .ok_or_else(|| LongPollError::decode(name, "missing from response"))?;
    raw_int(raw).ok_or_else(|| {
        LongPollError::decode(
            name,
            format!("expected an integer or numeric string, got {}", raw.get()),
        )
    })
}

pub(crate) fn optional_int(fields: &Fields<'_>, name: &str) -> Option<i64> {
    fields.get(name).and_then(|raw| raw_int(raw))
}

fn raw_int(raw: &RawValue) -> Option<i64> {
    serde_json::from_str::<Value>(raw.get())
        .ok()
        .as_ref()
        .and_then(int_from_number_or_string)
}

fn failure_code(fields: &Fields<'_>) -> i64 {
    fields
        .get("failed")
        .and_then(|raw| serde_json::from_str::<i64>(raw.get()).ok())
        .unwrap_or(0)
}

fn updates_at(fields: &Fields<'_>, path: &[String]) -> Result<Option<Vec<Update>>, LongPollError> {
    let Some((first, rest)) = path.split_first() else {
        return Ok(None);
    };
    let Some(mut current) = fields.get(first).copied() else {
        return Ok(None);
    };

    for (depth, key) in rest.iter().enumerate() {
        let nested: Fields<'_> = serde_json::from_str(current.get()).map_err(|_| {
            LongPollError::decode(display_path(&path[..=depth]), "expected a JSON object")
        })?;
        match nested.get(key) {
            Some(next) => current = next,
            None => return Ok(None),
        }
    }

    let items: Vec<&RawValue> = serde_json::from_str(current.get())
        .map_err(|_| LongPollError::decode(display_path(path), "expected a JSON array"))?;

    Ok(Some(
        items
            .into_iter()
            .map(|item| Update::from_json_text(item.get()))
            .collect(),
    ))
}

fn display_path(path: &[String]) -> String {
    path.join(".")
}
