//! SHA-256 hashing, canonical JSON, and Merkle roots.
//!
//! Every content-addressed id in this crate (`spec.md` §3's `H(...)`
//! notation) goes through [`canonical_json`] before hashing so two peers
//! that agree on the data agree on the hash, independent of struct field
//! order or serializer whitespace choices.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 digest of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Joins parts with `:` and hashes the result, matching the `H(a:b:c)`
/// notation used throughout `spec.md` for derived (non-JSON) ids.
pub fn hash_parts(parts: &[&str]) -> String {
    sha256_hex(parts.join(":").as_bytes())
}

/// Serializes `value` as canonical JSON: sorted keys, no insignificant
/// whitespace, numbers in their serde-default round-trip form. `serde_json`
/// with the `preserve_order` feature disabled already sorts map keys via
/// its default `BTreeMap`-backed `Value`; we re-parse through `Value` to
/// normalize field order regardless of the source struct's derive order.
pub fn canonical_json<T: Serialize>(value: &T) -> String {
    let v = serde_json::to_value(value).expect("value must serialize to JSON");
    canonicalize_value(&v)
}

fn canonicalize_value(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let body = entries
                .into_iter()
                .map(|(k, v)| format!("{}:{}", serde_json::to_string(k).unwrap(), canonicalize_value(v)))
                .collect::<Vec<_>>()
                .join(",");
            format!("{{{body}}}")
        }
        Value::Array(items) => {
            let body = items
                .iter()
                .map(canonicalize_value)
                .collect::<Vec<_>>()
                .join(",");
            format!("[{body}]")
        }
        other => other.to_string(),
    }
}

/// Hashes `value` via [`canonical_json`].
pub fn hash_json<T: Serialize>(value: &T) -> String {
    sha256_hex(canonical_json(value).as_bytes())
}

/// Merkle root over `leaves`, each already a hex digest.
///
/// - Empty input: 64 zero hex characters.
/// - Single leaf: the leaf itself.
/// - Otherwise: pairwise-hash left to right, duplicating the last leaf
///   whenever a level has odd size, repeated until one node remains.
pub fn merkle_root<S: AsRef<str>>(leaves: &[S]) -> String {
    if leaves.is_empty() {
        return "0".repeat(64);
    }
    if leaves.len() == 1 {
        return leaves[0].as_ref().to_string();
    }
    let mut level: Vec<String> = leaves.iter().map(|l| l.as_ref().to_string()).collect();
    while level.len() > 1 {
        if level.len() % 2 == 1 {
            let last = level.last().unwrap().clone();
            level.push(last);
        }
        level = level
            .chunks(2)
            .map(|pair| sha256_hex(format!("{}{}", pair[0], pair[1]).as_bytes()))
            .collect();
    }
    level.into_iter().next().unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_merkle_root_is_64_zeros() {
        let leaves: Vec<String> = vec![];
        assert_eq!(merkle_root(&leaves), "0".repeat(64));
    }

    #[test]
    fn single_leaf_merkle_root_is_the_leaf() {
        assert_eq!(merkle_root(&["abc"]), "abc");
    }

    #[test]
    fn odd_level_duplicates_last_leaf() {
        let ab = sha256_hex(b"ab");
        let cc = sha256_hex(b"cc");
        let expected = sha256_hex(format!("{ab}{cc}").as_bytes());
        assert_eq!(merkle_root(&["a", "b", "c"]), expected);
    }

    #[test]
    fn different_leaf_order_yields_different_root() {
        assert_ne!(merkle_root(&["a", "b"]), merkle_root(&["b", "a"]));
    }

    #[test]
    fn canonical_json_sorts_keys_regardless_of_struct_order() {
        let a = json!({"b": 1, "a": 2});
        let b = json!({"a": 2, "b": 1});
        assert_eq!(canonical_json(&a), canonical_json(&b));
        assert_eq!(canonical_json(&a), r#"{"a":2,"b":1}"#);
    }

    #[test]
    fn hash_json_is_deterministic() {
        let v = json!({"x": 1});
        assert_eq!(hash_json(&v), hash_json(&v));
    }

    #[quickcheck_macros::quickcheck]
    fn sha256_hex_is_deterministic_and_64_chars(data: Vec<u8>) -> bool {
        let first = sha256_hex(&data);
        sha256_hex(&data) == first && first.len() == 64
    }

    #[quickcheck_macros::quickcheck]
    fn merkle_root_of_singleton_is_the_leaf(leaf: String) -> bool {
        merkle_root(&[leaf.clone()]) == leaf
    }
}
