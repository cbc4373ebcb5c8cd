//! Canonical runner-identity fingerprinting.
//!
//! The digest is the cache key for the reuse-vs-reload decision, so it must
//! be deterministic across processes and platforms. Identity fields are
//! streamed into a SHA-256 hasher in a fixed order, each preceded by a field
//! tag and a big-endian length, and the result is hex encoded.
//!
//! Canonical byte layout (version 1):
//!
//! ```text
//! u32 format version (BE)
//! 0x01 name             0x02 short name       0x03 weights path
//! 0x04 original model   0x05 adapter paths    0x06 licenses
//! 0x07 options          (keys sorted lexicographically, recursively)
//! 0x08 embeddings       (attachment order; vector components as f64 BE bits)
//! ```
//!
//! Every variable-length element is length-prefixed, so adjacent fields can
//! never be re-partitioned into a colliding serialization.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use sha2::{Digest as _, Sha256};
use thiserror::Error;

use super::{Embedding, RunnerIdentity};

/// Version of the canonical serialization. Bump on any layout change so old
/// and new digests can never collide.
const DIGEST_VERSION: u32 = 1;

const TAG_NAME: u8 = 0x01;
const TAG_SHORT_NAME: u8 = 0x02;
const TAG_MODEL_PATH: u8 = 0x03;
const TAG_ORIGINAL_MODEL: u8 = 0x04;
const TAG_ADAPTER_PATHS: u8 = 0x05;
const TAG_LICENSE: u8 = 0x06;
const TAG_OPTIONS: u8 = 0x07;
const TAG_EMBEDDINGS: u8 = 0x08;

// JSON value discriminators inside the options field.
const JSON_NULL: u8 = 0x00;
const JSON_BOOL: u8 = 0x01;
const JSON_NUMBER: u8 = 0x02;
const JSON_STRING: u8 = 0x03;
const JSON_ARRAY: u8 = 0x04;
const JSON_OBJECT: u8 = 0x05;

/// An identity-bearing field was in a state with no canonical byte form.
///
/// These are catalog bugs, not transient conditions; the request fails and
/// nothing is retried.
#[derive(Debug, Error)]
pub enum DigestError {
    /// An embedding vector contains NaN or an infinity.
    #[error("embedding {index} contains a non-finite component: {value}")]
    NonFiniteComponent { index: usize, value: f64 },

    /// A weights or adapter path is not valid UTF-8.
    #[error("model path contains invalid UTF-8: {}", path.display())]
    InvalidPathUtf8 { path: PathBuf },
}

/// Compute the runner digest for `identity`.
///
/// Pure and deterministic: repeated calls on an equal identity return the
/// same 64-character lowercase hex string regardless of map iteration order
/// or platform. Rendering-only model fields never reach this function.
pub fn digest(identity: &RunnerIdentity) -> Result<String, DigestError> {
    let mut hasher = CanonicalHasher::new();

    hasher.field(TAG_NAME, identity.name.as_bytes());
    hasher.field(TAG_SHORT_NAME, identity.short_name.as_bytes());
    hasher.field(TAG_MODEL_PATH, path_bytes(&identity.model_path)?);
    hasher.field(TAG_ORIGINAL_MODEL, identity.original_model.as_bytes());

    hasher.count(TAG_ADAPTER_PATHS, identity.adapter_paths.len());
    for path in &identity.adapter_paths {
        let bytes = path_bytes(path)?;
        hasher.item(bytes);
    }

    hasher.count(TAG_LICENSE, identity.license.len());
    for license in &identity.license {
        hasher.item(license.as_bytes());
    }

    write_options(&mut hasher, &identity.options);

    hasher.count(TAG_EMBEDDINGS, identity.embeddings.len());
    for (index, embedding) in identity.embeddings.iter().enumerate() {
        write_embedding(&mut hasher, index, embedding)?;
    }

    Ok(hex::encode(hasher.finish()))
}

/// Streams the canonical serialization into SHA-256 without materializing
/// the full byte buffer, so large embedding sets hash in bounded memory.
struct CanonicalHasher {
    hasher: Sha256,
}

impl CanonicalHasher {
    fn new() -> Self {
        let mut hasher = Sha256::new();
        hasher.update(DIGEST_VERSION.to_be_bytes());
        Self { hasher }
    }

    /// Raw bytes with no framing. Callers must have emitted a length or
    /// count beforehand.
    fn raw(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    /// A length-prefixed element inside an already-tagged field.
    fn item(&mut self, data: &[u8]) {
        self.hasher.update((data.len() as u64).to_be_bytes());
        self.hasher.update(data);
    }

    /// A tagged scalar field: tag, length, bytes.
    fn field(&mut self, tag: u8, data: &[u8]) {
        self.hasher.update([tag]);
        self.item(data);
    }

    /// A tagged sequence header: tag, element count.
    fn count(&mut self, tag: u8, len: usize) {
        self.hasher.update([tag]);
        self.hasher.update((len as u64).to_be_bytes());
    }

    fn finish(self) -> impl AsRef<[u8]> {
        self.hasher.finalize()
    }
}

fn path_bytes(path: &Path) -> Result<&[u8], DigestError> {
    path.to_str()
        .map(str::as_bytes)
        .ok_or_else(|| DigestError::InvalidPathUtf8 {
            path: path.to_path_buf(),
        })
}

fn write_options(hasher: &mut CanonicalHasher, options: &HashMap<String, serde_json::Value>) {
    // Sort explicitly: the digest must not depend on map iteration order.
    let mut keys: Vec<&String> = options.keys().collect();
    keys.sort();

    hasher.count(TAG_OPTIONS, keys.len());
    for key in keys {
        hasher.item(key.as_bytes());
        write_json_value(hasher, &options[key]);
    }
}

fn write_json_value(hasher: &mut CanonicalHasher, value: &serde_json::Value) {
    use serde_json::Value;

    match value {
        Value::Null => hasher.raw(&[JSON_NULL]),
        Value::Bool(b) => hasher.raw(&[JSON_BOOL, *b as u8]),
        Value::Number(n) => {
            // serde_json's display form is deterministic and keeps the
            // integer/float distinction (1 vs 1.0).
            hasher.raw(&[JSON_NUMBER]);
            hasher.item(n.to_string().as_bytes());
        }
        Value::String(s) => {
            hasher.raw(&[JSON_STRING]);
            hasher.item(s.as_bytes());
        }
        Value::Array(items) => {
            hasher.raw(&[JSON_ARRAY]);
            hasher.raw(&(items.len() as u64).to_be_bytes());
            for item in items {
                write_json_value(hasher, item);
            }
        }
        Value::Object(map) => {
            hasher.raw(&[JSON_OBJECT]);
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            hasher.raw(&(keys.len() as u64).to_be_bytes());
            for key in keys {
                hasher.item(key.as_bytes());
                write_json_value(hasher, &map[key]);
            }
        }
    }
}

fn write_embedding(
    hasher: &mut CanonicalHasher,
    index: usize,
    embedding: &Embedding,
) -> Result<(), DigestError> {
    hasher.raw(&(embedding.vector.len() as u64).to_be_bytes());
    for &component in &embedding.vector {
        if !component.is_finite() {
            return Err(DigestError::NonFiniteComponent {
                index,
                value: component,
            });
        }
        hasher.raw(&component.to_be_bytes());
    }
    hasher.item(embedding.source_text.as_bytes());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn digest_of(identity: &RunnerIdentity) -> String {
        digest(identity).expect("digest should succeed")
    }

    #[test]
    fn length_prefixes_prevent_field_repartitioning() {
        let a = RunnerIdentity {
            license: vec!["ab".to_owned(), "c".to_owned()],
            ..Default::default()
        };
        let b = RunnerIdentity {
            license: vec!["a".to_owned(), "bc".to_owned()],
            ..Default::default()
        };
        assert_ne!(digest_of(&a), digest_of(&b));
    }

    #[test]
    fn empty_list_differs_from_empty_string_element() {
        let none = RunnerIdentity::default();
        let one_empty = RunnerIdentity {
            license: vec![String::new()],
            ..Default::default()
        };
        assert_ne!(digest_of(&none), digest_of(&one_empty));
    }

    #[test]
    fn nested_option_objects_are_key_sorted() {
        let value_ab = serde_json::json!({"a": 1, "b": 2});
        let value_ba = serde_json::json!({"b": 2, "a": 1});

        let mut a = RunnerIdentity::default();
        a.options.insert("nested".to_owned(), value_ab);
        let mut b = RunnerIdentity::default();
        b.options.insert("nested".to_owned(), value_ba);

        assert_eq!(digest_of(&a), digest_of(&b));
    }

    #[test]
    fn integer_and_float_options_are_distinct() {
        let mut a = RunnerIdentity::default();
        a.options
            .insert("temperature".to_owned(), serde_json::json!(1));
        let mut b = RunnerIdentity::default();
        b.options
            .insert("temperature".to_owned(), serde_json::json!(1.0));

        assert_ne!(digest_of(&a), digest_of(&b));
    }

    #[test]
    fn non_finite_vector_component_is_rejected() {
        let identity = RunnerIdentity {
            embeddings: vec![Embedding::new(vec![1.0, f64::NAN], "data")],
            ..Default::default()
        };
        let err = digest(&identity).expect_err("NaN component should fail");
        assert!(matches!(
            err,
            DigestError::NonFiniteComponent { index: 0, .. }
        ));
    }

    #[cfg(unix)]
    #[test]
    fn non_utf8_model_path_is_rejected() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let identity = RunnerIdentity {
            model_path: PathBuf::from(OsStr::from_bytes(b"/models/\xff.gguf")),
            ..Default::default()
        };
        let err = digest(&identity).expect_err("non-UTF-8 path should fail");
        assert!(matches!(err, DigestError::InvalidPathUtf8 { .. }));
    }
}
