//! Node, branch and request identifiers.
//!
//! Node and branch ids become parts of store keys and execution ids, where
//! `.` separates frames and `-` suffixes mark key roles. Ids are therefore
//! restricted to a small alphabet.

use regex::Regex;
use std::sync::LazyLock;
use uuid::Uuid;

#[allow(clippy::expect_used)]
static ID_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("id pattern compiles"));

/// Returns true if `id` can be used as a node or branch id.
#[must_use]
pub fn is_valid_id(id: &str) -> bool {
    ID_PATTERN.is_match(id)
}

/// Generates a new time-ordered request id.
#[must_use]
pub fn new_request_id() -> String {
    Uuid::now_v7().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_ids() {
        for id in ["A", "node_1", "even", "fan-out", "42"] {
            assert!(is_valid_id(id), "{id}");
        }
    }

    #[test]
    fn test_invalid_ids() {
        for id in ["", "a.b", "a b", "a/b", "ü"] {
            assert!(!is_valid_id(id), "{id}");
        }
    }

    #[test]
    fn test_request_ids_are_unique_v7() {
        let a = new_request_id();
        let b = new_request_id();
        assert_ne!(a, b);
        assert_eq!(Uuid::parse_str(&a).unwrap().get_version_num(), 7);
    }
}
