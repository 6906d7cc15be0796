//! Key-order consistency checking.
//!
//! A diagnostic primitive, not part of the hot path: scans the merged view
//! in key order and reports the first pair of keys that is not strictly
//! increasing. Detection only; no repair is attempted.

use crate::error::{CoreError, CoreResult};
use crate::types::Entry;

/// Verifies strictly ascending key order over an entry stream.
///
/// Returns the last key seen, or `None` for an empty stream.
///
/// # Errors
///
/// Returns [`CoreError::ConsistencyViolation`] naming both offending keys
/// the first time a key is not strictly greater than its predecessor.
pub(crate) fn check_order(
    entries: impl Iterator<Item = CoreResult<Entry>>,
) -> CoreResult<Option<Vec<u8>>> {
    let mut prev: Option<Vec<u8>> = None;
    for entry in entries {
        let entry = entry?;
        if let Some(prev_key) = &prev {
            if entry.key <= *prev_key {
                return Err(CoreError::ConsistencyViolation {
                    prev: prev_key.clone(),
                    next: entry.key,
                });
            }
        }
        prev = Some(entry.key);
    }
    Ok(prev)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(keys: &[&[u8]]) -> Vec<CoreResult<Entry>> {
        keys.iter()
            .map(|k| Ok(Entry::new(k.to_vec(), b"v".to_vec())))
            .collect()
    }

    #[test]
    fn empty_stream_returns_none() {
        assert_eq!(check_order(entries(&[]).into_iter()).unwrap(), None);
    }

    #[test]
    fn ordered_stream_returns_last_key() {
        let last = check_order(entries(&[b"a", b"b", b"c"]).into_iter()).unwrap();
        assert_eq!(last, Some(b"c".to_vec()));
    }

    #[test]
    fn repeated_key_is_a_violation() {
        let err = check_order(entries(&[b"a", b"b", b"b"]).into_iter()).unwrap_err();
        match err {
            CoreError::ConsistencyViolation { prev, next } => {
                assert_eq!(prev, b"b");
                assert_eq!(next, b"b");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn decreasing_key_is_a_violation() {
        let err = check_order(entries(&[b"a", b"c", b"b"]).into_iter()).unwrap_err();
        match err {
            CoreError::ConsistencyViolation { prev, next } => {
                assert_eq!(prev, b"c");
                assert_eq!(next, b"b");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn propagates_source_errors() {
        let stream = vec![
            Ok(Entry::new(b"a".to_vec(), b"v".to_vec())),
            Err(CoreError::corrupted("bad record")),
        ];
        assert!(check_order(stream.into_iter()).is_err());
    }
}
