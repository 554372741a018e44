use crate::error::TypeError;

/// Longest key a memcached-compatible node accepts, in bytes.
pub const MAX_KEY_LENGTH: usize = 250;

/// Check that `key` can be sent to a node.
///
/// Binary-protocol keys only need to be non-empty and short enough. Text keys
/// additionally may not contain whitespace or control characters, since those
/// delimit the command line.
pub fn validate_key(key: &str, binary: bool) -> Result<(), TypeError> {
    if key.is_empty() {
        return Err(invalid(key, "key must contain at least one character"));
    }
    if key.len() > MAX_KEY_LENGTH {
        return Err(invalid(
            key,
            format!("key is {} bytes, maximum is {MAX_KEY_LENGTH}", key.len()),
        ));
    }
    if !binary {
        if let Some(c) = key.chars().find(|c| c.is_whitespace() || c.is_control()) {
            return Err(invalid(
                key,
                format!("key contains invalid character {c:?}"),
            ));
        }
    }
    Ok(())
}

fn invalid(key: &str, reason: impl Into<String>) -> TypeError {
    TypeError::InvalidKey {
        key: key.to_string(),
        reason: reason.into(),
    }
}
