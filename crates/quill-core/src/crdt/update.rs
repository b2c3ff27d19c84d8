//! Encoded document updates and their commutative merge.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::{Element, Tag};
use crate::error::ErrorCode;

/// A delta against a [`DocState`](super::DocState): tagged inserts plus
/// removed tags.
///
/// Writers must mint a fresh tag per insert; a given tag always carries
/// the same payload. Under that contract, merging updates is a plain set
/// union — commutative, associative, and idempotent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Update {
    pub(crate) inserts: BTreeMap<Tag, Element>,
    pub(crate) removes: BTreeSet<Tag>,
}

impl Update {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an insert of `text` at `order_key` carried by `tag`.
    #[must_use]
    pub fn with_insert(mut self, tag: Tag, order_key: &str, text: &str) -> Self {
        self.inserts.insert(
            tag,
            Element {
                order_key: order_key.to_string(),
                text: text.to_string(),
            },
        );
        self
    }

    /// Add a removal of the fragment carried by `tag`.
    #[must_use]
    pub fn with_remove(mut self, tag: Tag) -> Self {
        self.removes.insert(tag);
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.removes.is_empty()
    }

    /// Merge any number of updates into one combined update.
    pub fn merge_all(updates: impl IntoIterator<Item = Self>) -> Self {
        let mut combined = Self::new();
        for update in updates {
            combined.inserts.extend(update.inserts);
            combined.removes.extend(update.removes);
        }
        combined
    }

    /// Serialize for the update log.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).context("encode update")
    }

    /// Deserialize an update-log payload.
    ///
    /// # Errors
    ///
    /// Fails with [`ErrorCode::UpdateDecodeFailed`] on malformed bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .with_context(|| format!("{}: decode update payload", ErrorCode::UpdateDecodeFailed))
    }
}

#[cfg(test)]
mod tests {
    use super::{Tag, Update};

    #[test]
    fn merge_all_is_order_insensitive() {
        let a = Update::new().with_insert(Tag::new("a", 1), "k1", "x");
        let b = Update::new().with_remove(Tag::new("b", 2));
        let c = Update::new().with_insert(Tag::new("c", 3), "k2", "y");

        let forward = Update::merge_all([a.clone(), b.clone(), c.clone()]);
        let backward = Update::merge_all([c, b, a]);
        assert_eq!(forward, backward);
    }

    #[test]
    fn merge_all_deduplicates() {
        let update = Update::new()
            .with_insert(Tag::new("a", 1), "k", "x")
            .with_remove(Tag::new("b", 2));
        let merged = Update::merge_all([update.clone(), update.clone()]);
        assert_eq!(merged, update);
    }

    #[test]
    fn payload_roundtrip() {
        let update = Update::new()
            .with_insert(Tag::new("alice", 4), "m", "hi")
            .with_remove(Tag::new("bob", 9));
        let decoded = Update::decode(&update.encode().expect("encode")).expect("decode");
        assert_eq!(decoded, update);
    }

    #[test]
    fn decode_rejects_garbage_with_update_code() {
        let err = Update::decode(b"\x00\x01").expect_err("should fail");
        assert!(format!("{err:#}").contains("E2003"));
    }
}
