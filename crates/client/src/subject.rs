//! Naming conventions mapping key-value buckets onto streams and subjects.
//!
//! Bucket `cfg` lives in stream `KV_cfg`, key `flag` is published on
//! `$KV.cfg.flag`, and the bucket watcher is the durable `cfg_watcher`.
//! These match the layout NATS uses for its own KV buckets.

/// Header carrying the operation of a KV message (`DEL` or `PURGE`; absent for puts).
pub const KV_OPERATION_HEADER: &str = "KV-Operation";

const KV_SUBJECT_PREFIX: &str = "$KV";
const KV_STREAM_PREFIX: &str = "KV_";
const WATCHER_SUFFIX: &str = "_watcher";

/// Stream backing `bucket`.
#[must_use]
pub fn kv_stream_name(bucket: &str) -> String {
    format!("{KV_STREAM_PREFIX}{bucket}")
}

/// Subject the value of `key` in `bucket` is published on.
#[must_use]
pub fn kv_subject(bucket: &str, key: &str) -> String {
    format!("{KV_SUBJECT_PREFIX}.{bucket}.{key}")
}

/// Filter covering every key of `bucket`.
#[must_use]
pub fn kv_watch_subject(bucket: &str) -> String {
    format!("{KV_SUBJECT_PREFIX}.{bucket}.>")
}

/// Durable consumer name of the watcher on `bucket`.
#[must_use]
pub fn watcher_durable_name(bucket: &str) -> String {
    format!("{bucket}{WATCHER_SUFFIX}")
}

/// Recovers the key from a message subject of `bucket`.
#[must_use]
pub fn key_from_subject<'a>(bucket: &str, subject: &'a str) -> Option<&'a str> {
    subject
        .strip_prefix(KV_SUBJECT_PREFIX)?
        .strip_prefix('.')?
        .strip_prefix(bucket)?
        .strip_prefix('.')
        .filter(|key| !key.is_empty())
}

/// Bucket names are limited to ASCII letters, digits, `-` and `_`.
#[must_use]
pub fn is_valid_bucket(bucket: &str) -> bool {
    !bucket.is_empty()
        && bucket
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Keys may be dotted but must not contain wildcards, whitespace or empty tokens.
#[must_use]
pub fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && key.split('.').all(|token| {
            !token.is_empty()
                && !token
                    .chars()
                    .any(|c| c == '*' || c == '>' || c.is_whitespace())
        })
}
