//! Subject syntax shared by every transport.
//!
//! Subjects are dot-separated tokens. Filters may use `*` to match exactly one
//! token and a trailing `>` to match one or more remaining tokens.

const SINGLE_WILDCARD: &str = "*";
const FULL_WILDCARD: &str = ">";

/// Returns true if `subject` is a concrete subject that can be published to.
#[must_use]
pub fn is_valid_subject(subject: &str) -> bool {
    is_valid(subject, false)
}

/// Returns true if `filter` is a valid subscription filter (wildcards allowed).
#[must_use]
pub fn is_valid_filter(filter: &str) -> bool {
    is_valid(filter, true)
}

fn is_valid(subject: &str, allow_wildcards: bool) -> bool {
    if subject.is_empty() {
        return false;
    }

    let mut tokens = subject.split('.').peekable();
    while let Some(token) = tokens.next() {
        if token.is_empty() || token.chars().any(char::is_whitespace) {
            return false;
        }

        match token {
            SINGLE_WILDCARD if !allow_wildcards => return false,
            FULL_WILDCARD if !allow_wildcards || tokens.peek().is_some() => return false,
            _ if token.len() > 1 && (token.contains('*') || token.contains('>')) => {
                return false;
            }
            _ => {}
        }
    }

    true
}

/// Returns true if `subject` is covered by `filter`.
///
/// Wildcard tokens inside `subject` are compared literally, so a filter always
/// covers itself: `$KV.cfg.>` covers both `$KV.cfg.a` and `$KV.cfg.>`.
#[must_use]
pub fn matches(filter: &str, subject: &str) -> bool {
    let mut filter_tokens = filter.split('.');
    let mut subject_tokens = subject.split('.');

    loop {
        match (filter_tokens.next(), subject_tokens.next()) {
            (Some(FULL_WILDCARD), Some(_)) => return true,
            (Some(SINGLE_WILDCARD), Some(_)) => {}
            (Some(f), Some(s)) if f == s => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}
