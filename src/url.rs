use url::Url;

use crate::error::LongPollError;

/// Query parameters whose values never leave the process in logs or errors.
const SECRET_PARAMS: &[&str] = &["key", "access_token"];

const REDACTED: &str = "***";

/// Normalize a Long Poll server address into an absolute URL.
///
/// Upstream APIs return the server without a scheme (`lp.vk.com/wh123`);
/// `https://` is prefixed unless the value already starts with `https://`
/// or `http://`.
pub fn normalize_server_url(input: &str) -> Result<Url, LongPollError> {
    let trimmed = input.trim();
    let candidate = if trimmed.starts_with("https://") || trimmed.starts_with("http://") {
        trimmed.to_owned()
    } else {
        format!("https://{trimmed}")
    };

    Url::parse(&candidate).map_err(|source| LongPollError::InvalidServerUrl {
        url: candidate,
        source,
    })
}

/// Render `url` with secret query values masked.
pub fn redacted(url: &Url) -> String {
    if !url
        .query_pairs()
        .any(|(name, _)| SECRET_PARAMS.contains(&name.as_ref()))
    {
        return url.to_string();
    }

    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(name, value)| {
            let value = if SECRET_PARAMS.contains(&name.as_ref()) {
                REDACTED.to_owned()
            } else {
                value.into_owned()
            };
            (name.into_owned(), value)
        })
        .collect();

    let mut masked = url.clone();
    masked.query_pairs_mut().clear().extend_pairs(pairs);
    masked.to_string()
}

/// Set `name` to `value`, replacing an existing pair in place so the
/// existing parameter order survives.
pub(crate) fn set_param(params: &mut Vec<(String, String)>, name: &str, value: impl Into<String>) {
    let value = value.into();
    if let Some(slot) = params.iter_mut().find(|(existing, _)| existing == name) {
        slot.1 = value;
        params.retain({
            let mut seen = false;
            move |(existing, _)| {
                if existing != name {
                    return true;
                }
                let keep = !seen;
                seen = true;
                keep
            }
        });
    } else {
        params.push((name.to_owned(), value));
    }
}

#[cfg(test)]
mod tests {
    use super::set_param;

    #[test]
    fn set_param_replaces_in_place_and_drops_duplicates() {
        let mut params = vec![
            ("a".to_owned(), "1".to_owned()),
            ("key".to_owned(), "old".to_owned()),
            ("key".to_owned(), "older".to_owned()),
        ];
        set_param(&mut params, "key", "new");
        set_param(&mut params, "b", "2");

        assert_eq!(
            params,
            vec![
                ("a".to_owned(), "1".to_owned()),
                ("key".to_owned(), "new".to_owned()),
                ("b".to_owned(), "2".to_owned()),
            ]
        );
    }
}
