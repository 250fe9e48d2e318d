//! Composite key encoding.
//!
//! Timestamps are inverted before encoding so that ascending key order is
//! descending time order. The inverted value is zero-padded to a fixed
//! width so lexical comparison matches numeric comparison.

use crate::error::{StateError, StateResult};

/// Upper bound for accepted unix timestamps (2^34 seconds, year 2514).
pub const MAX_TIMESTAMP: u64 = 1 << 34;

/// Separator between key components. Rejected inside names.
pub const SEPARATOR: char = '|';

const INVERTED_WIDTH: usize = 17;

/// `(2^34 - ts) * 1_000_000`, the newest-first sort value for `ts`.
pub fn inverted_timestamp(ts: u64) -> StateResult<u64> {
    if ts > MAX_TIMESTAMP {
        return Err(StateError::Malformed(format!(
            "timestamp {ts} is beyond {MAX_TIMESTAMP}"
        )));
    }
    Ok((MAX_TIMESTAMP - ts) * 1_000_000)
}

fn encode_inverted(ts: u64) -> StateResult<String> {
    Ok(format!("{:0width$}", inverted_timestamp(ts)?, width = INVERTED_WIDTH))
}

/// True if `s` is an encoded inverted timestamp as produced by the key builders.
pub fn is_inverted_component(s: &str) -> bool {
    s.len() == INVERTED_WIDTH && s.bytes().all(|b| b.is_ascii_digit())
}

/// Check that a key component is non-empty and free of the separator.
pub fn validate_component(kind: &str, value: &str) -> StateResult<()> {
    if value.is_empty() {
        return Err(StateError::Malformed(format!("{kind} must not be empty")));
    }
    if value.contains(SEPARATOR) {
        return Err(StateError::Malformed(format!(
            "{kind} {value:?} must not contain '{SEPARATOR}'"
        )));
    }
    Ok(())
}

/// Primary log record key: `{service}|{host}|{inverted}`.
pub fn log_record_key(service: &str, host: &str, ts: u64) -> StateResult<String> {
    Ok(format!("{service}|{host}|{}", encode_inverted(ts)?))
}

/// Cross-host timeline key: `{service}|{inverted}|{host}`.
pub fn log_timeline_key(service: &str, host: &str, ts: u64) -> StateResult<String> {
    Ok(format!("{service}|{}|{host}", encode_inverted(ts)?))
}

/// Request-rate sample key: `{app_id}|{inverted}`.
pub fn request_rate_key(app_id: &str, ts: u64) -> StateResult<String> {
    Ok(format!("{app_id}|{}", encode_inverted(ts)?))
}

/// Instance key: `{app_id}|{host}|{port}`, port zero-padded so ports sort
/// numerically within a host.
pub fn instance_key(app_id: &str, host: &str, port: u16) -> StateResult<String> {
    validate_component("app id", app_id)?;
    validate_component("host", host)?;
    Ok(format!("{app_id}|{host}|{port:05}"))
}

/// Prefix shared by every key of one scan, e.g. `{service}|` or `{service}|{host}|`.
pub fn scan_prefix(parts: &[&str]) -> String {
    let mut prefix = String::new();
    for part in parts {
        prefix.push_str(part);
        prefix.push(SEPARATOR);
    }
    prefix
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inverted_matches_formula() {
        let ts = 1_700_000_000;
        assert_eq!(
            inverted_timestamp(ts).unwrap(),
            (17_179_869_184 - 1_700_000_000) * 1_000_000
        );
    }

    #[test]
    fn record_key_has_no_padding_for_realistic_timestamps() {
        let ts = 1_700_000_000u64;
        let key = log_record_key("s1", "h1", ts).unwrap();
        assert_eq!(key, format!("s1|h1|{}", ((1u64 << 34) - ts) * 1_000_000));
    }

    #[test]
    fn newer_timestamps_sort_first() {
        let older = log_record_key("s", "h", 1_000).unwrap();
        let newer = log_record_key("s", "h", 2_000).unwrap();
        assert!(newer < older);

        // Fixed width keeps lexical order numeric near the epoch as well.
        let ancient = log_record_key("s", "h", 0).unwrap();
        assert!(older < ancient);
    }

    #[test]
    fn timestamp_beyond_bound_is_malformed() {
        assert!(matches!(
            inverted_timestamp(MAX_TIMESTAMP + 1),
            Err(StateError::Malformed(_))
        ));
        assert_eq!(inverted_timestamp(MAX_TIMESTAMP).unwrap(), 0);
    }

    #[test]
    fn components_reject_separator() {
        assert!(validate_component("host", "10.0.0.1").is_ok());
        assert!(validate_component("host", "a|b").is_err());
        assert!(validate_component("service", "").is_err());
    }

    #[test]
    fn inverted_component_shape() {
        let key = log_record_key("s", "h", 1_000).unwrap();
        assert!(is_inverted_component(&key["s|h|".len()..]));
        assert!(!is_inverted_component("h|00000000000000000"));
        assert!(!is_inverted_component("1234"));
    }

    #[test]
    fn instance_ports_sort_numerically() {
        let low = instance_key("guestbook", "10.0.0.2", 8080).unwrap();
        let high = instance_key("guestbook", "10.0.0.2", 20000).unwrap();
        assert_eq!(low, "guestbook|10.0.0.2|08080");
        assert!(low < high);
        assert!(instance_key("guestbook", "a|b", 1).is_err());
    }

    #[test]
    fn prefix_joins_parts() {
        assert_eq!(scan_prefix(&["s1"]), "s1|");
        assert_eq!(scan_prefix(&["s1", "h1"]), "s1|h1|");
    }
}
