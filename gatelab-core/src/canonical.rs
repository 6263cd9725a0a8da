//! Canonical JSON and content hashing.
//!
//! Canonical form = `serde_json::Value` with `BTreeMap`-backed objects (sorted
//! keys). Two renderings exist:
//! - compact (`,` / `:` separators, no whitespace), used as the hashing input;
//! - pretty (2-space indent, trailing newline), used for artifacts on disk.
//!
//! Non-finite floats have no JSON representation. serde_json maps them to
//! `null` silently, so callers must reject them before reaching this module
//! (see [`ensure_finite`]).

use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Prefix carried by every SHA-256 fingerprint.
pub const SHA256_PREFIX: &str = "sha256:";

/// Errors from canonical serialization.
#[derive(Debug, Error)]
pub enum CanonicalError {
    #[error("serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("non-finite value in field `{field}`: {value}")]
    NonFinite { field: String, value: f64 },
}

/// Serialize to canonical compact JSON (sorted keys, fixed separators).
pub fn to_canonical_string<T: Serialize>(value: &T) -> Result<String, CanonicalError> {
    // Round-trip through Value so struct field order never leaks into the output.
    let value = serde_json::to_value(value)?;
    Ok(serde_json::to_string(&value)?)
}

/// Serialize to canonical pretty JSON: sorted keys, 2-space indent, trailing newline.
pub fn to_canonical_pretty<T: Serialize>(value: &T) -> Result<String, CanonicalError> {
    let value = serde_json::to_value(value)?;
    let mut out = serde_json::to_string_pretty(&value)?;
    out.push('\n');
    Ok(out)
}

/// `"sha256:" + hex` over the canonical compact serialization.
pub fn sha256_fingerprint<T: Serialize>(value: &T) -> Result<String, CanonicalError> {
    let canonical = to_canonical_string(value)?;
    Ok(sha256_prefixed(canonical.as_bytes()))
}

/// `"sha256:" + hex` over raw bytes.
pub fn sha256_prefixed(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    format!("{SHA256_PREFIX}{}", hex::encode(digest))
}

/// BLAKE3 content id over the canonical compact serialization.
///
/// Used for run-local identities (provenance ids, params hashes) where the
/// `sha256:` version identity is not required.
pub fn blake3_content_id<T: Serialize>(value: &T) -> Result<String, CanonicalError> {
    let canonical = to_canonical_string(value)?;
    Ok(blake3::hash(canonical.as_bytes()).to_hex().to_string())
}

/// Reject NaN and infinities before they reach a canonical document.
pub fn ensure_finite(field: &str, value: f64) -> Result<f64, CanonicalError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(CanonicalError::NonFinite {
            field: field.to_string(),
            value,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Serialize)]
    struct Zebra {
        zeta: u32,
        alpha: &'static str,
    }

    #[test]
    fn keys_are_sorted_regardless_of_field_order() {
        let s = to_canonical_string(&Zebra { zeta: 1, alpha: "a" }).unwrap();
        assert_eq!(s, r#"{"alpha":"a","zeta":1}"#);
    }

    #[test]
    fn pretty_uses_two_space_indent_and_trailing_newline() {
        let s = to_canonical_pretty(&Zebra { zeta: 1, alpha: "a" }).unwrap();
        assert_eq!(s, "{\n  \"alpha\": \"a\",\n  \"zeta\": 1\n}\n");
    }

    #[test]
    fn fingerprint_has_prefix_and_64_hex_chars() {
        let fp = sha256_fingerprint(&Zebra { zeta: 1, alpha: "a" }).unwrap();
        assert!(fp.starts_with(SHA256_PREFIX));
        assert_eq!(fp.len(), SHA256_PREFIX.len() + 64);
    }

    #[test]
    fn sha256_of_empty_input_is_known_vector() {
        assert_eq!(
            sha256_prefixed(b""),
            "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn ensure_finite_rejects_nan_and_inf() {
        assert!(ensure_finite("x", 1.0).is_ok());
        assert!(ensure_finite("x", f64::NAN).is_err());
        assert!(ensure_finite("x", f64::INFINITY).is_err());
    }
}
