//! Helpers for `&`-separated form/query strings.
//!
//! The session cookie is an opaque `key=value&key=value` string minted
//! by the login flow; both the config fetch and the tunnel handshake
//! forward filtered copies of it.

/// Filter the fields of `query` by exact key match against the
/// comma-separated `keys` list. With `include` set, only listed keys
/// survive; otherwise listed keys are removed. Field order and the
/// `&` joining are preserved.
pub fn filter_fields(query: &str, keys: &str, include: bool) -> String {
    query
        .split('&')
        .filter(|field| {
            let key = field.split('=').next().unwrap_or(field);
            let listed = keys.split(',').any(|k| k == key);
            listed == include
        })
        .collect::<Vec<_>>()
        .join("&")
}

/// Append `&key=value` to a request body under construction.
pub fn append_opt(body: &mut String, key: &str, value: &str) {
    if !body.is_empty() && !body.ends_with('&') && !body.ends_with('?') {
        body.push('&');
    }
    body.push_str(key);
    body.push('=');
    body.push_str(value);
}
