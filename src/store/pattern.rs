//! Dot-delimited key validation and wildcard matching.
//!
//! `*` matches exactly one token, `>` matches one or more trailing tokens.

use crate::error::{Result, SdError};

/// Token delimiter in every key path.
pub const DELIMITER: char = '.';

fn valid_token_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '/' | '=')
}

/// Check a concrete key: non-empty tokens of `[A-Za-z0-9-_/=]`.
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() || key.split(DELIMITER).any(|t| t.is_empty() || !t.chars().all(valid_token_char)) {
        return Err(SdError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// Check a watch pattern; wildcards must be whole tokens, `>` only last.
pub fn validate_pattern(pattern: &str) -> Result<()> {
    let tokens: Vec<&str> = pattern.split(DELIMITER).collect();
    let last = tokens.len() - 1;

    for (i, token) in tokens.iter().enumerate() {
        let ok = match *token {
            "*" => true,
            ">" => i == last,
            t => !t.is_empty() && t.chars().all(valid_token_char),
        };
        if !ok {
            return Err(SdError::InvalidKey(pattern.to_string()));
        }
    }
    Ok(())
}

/// Does `key` match `pattern`?
pub fn matches(pattern: &str, key: &str) -> bool {
    let mut keys = key.split(DELIMITER);

    for token in pattern.split(DELIMITER) {
        match token {
            ">" => return keys.next().is_some(),
            "*" => {
                if keys.next().is_none() {
                    return false;
                }
            }
            literal => {
                if keys.next() != Some(literal) {
                    return false;
                }
            }
        }
    }

    keys.next().is_none()
}
