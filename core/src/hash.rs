//! Hash primitives shared by every component that touches the chain.
//!
//! Two building blocks: plain SHA-256 over bytes, and `det_json`, the
//! canonical JSON encoding every hashed or signed value must pass through.
//! Any other encoding (field-declaration order, pretty-printing, trailing
//! zeros on numbers) would make the same logical event hash differently in
//! two implementations, which defeats cross-verifier replay.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Compute the SHA-256 digest of `data` and return it as lowercase hex.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Compute the SHA-256 digest of the concatenation of `parts`.
///
/// Used wherever the spec writes `SHA-256(a ‖ b)` — concatenating the raw
/// bytes of each part and hashing once, rather than hashing each part and
/// concatenating the digests.
pub fn sha256_hex_concat(parts: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hex::encode(hasher.finalize())
}

/// Encode `value` as canonical JSON: object keys in lexicographic order,
/// arrays in given order, no insignificant whitespace, `null` explicit for
/// `None`.
///
/// Implementation note: `serde_json::Value`'s map type is a `BTreeMap`
/// unless the `preserve_order` feature is enabled (it isn't, here), so
/// bouncing a value through `to_value` before re-serializing it sorts
/// object keys for free instead of requiring a manual key-sort pass.
pub fn det_json<T: Serialize>(value: &T) -> Result<String> {
    let as_value = serde_json::to_value(value).map_err(Error::Serialization)?;
    serde_json::to_string(&as_value).map_err(Error::Serialization)
}
