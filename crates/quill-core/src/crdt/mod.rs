//! Tag-based observed-remove sequence CRDT for document content.
//!
//! A document is a set of text fragments, each carried by a unique tag
//! (replica id + per-replica counter) and positioned by an order key.
//! Removal tombstones the tag rather than forgetting it, so an insert that
//! arrives after its own removal stays dead.
//!
//! # Semilattice Properties
//!
//! State application satisfies the semilattice laws over any set of
//! updates:
//! - **Commutative**: apply(apply(s, a), b) = apply(apply(s, b), a)
//! - **Associative**: merging updates before applying changes nothing
//! - **Idempotent**: re-applying an already-seen update is a no-op
//!
//! # Fingerprints
//!
//! [`DocState::fingerprint`] hashes only the *visible* rendering
//! (tombstoned fragments excluded). Two states with different internal
//! tombstone sets but the same visible text fingerprint as equal — this is
//! the "did the content semantically change" check the compactor uses, as
//! opposed to byte equality of the encoded state.

pub mod update;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::ErrorCode;

pub use self::update::Update;

/// Unique identity of one inserted fragment: replica id plus a counter
/// that the replica increments per operation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Tag {
    pub replica: String,
    pub counter: u64,
}

impl Tag {
    #[must_use]
    pub fn new(replica: &str, counter: u64) -> Self {
        Self {
            replica: replica.to_string(),
            counter,
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.counter, self.replica)
    }
}

impl From<Tag> for String {
    fn from(tag: Tag) -> Self {
        tag.to_string()
    }
}

impl TryFrom<String> for Tag {
    type Error = String;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        let (counter, replica) = raw
            .split_once('@')
            .ok_or_else(|| format!("malformed tag {raw:?}"))?;
        let counter = counter
            .parse()
            .map_err(|err| format!("malformed tag counter in {raw:?}: {err}"))?;
        Ok(Self {
            replica: replica.to_string(),
            counter,
        })
    }
}

/// One positioned text fragment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Element {
    /// Lexicographic position of the fragment within the document.
    pub order_key: String,
    /// The fragment text.
    pub text: String,
}

/// Logical fingerprint of the visible document content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    #[must_use]
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// Full materialized document state: live fragments, tombstones, and the
/// version vector of incorporated operations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocState {
    elements: BTreeMap<Tag, Element>,
    tombstones: BTreeSet<Tag>,
    vector: BTreeMap<String, u64>,
}

impl DocState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold an update into this state.
    ///
    /// Tombstones win over inserts regardless of arrival order, which is
    /// what makes application commutative and idempotent.
    pub fn apply(&mut self, update: &Update) {
        for (tag, element) in &update.inserts {
            self.observe(tag);
            if !self.tombstones.contains(tag) {
                self.elements.insert(tag.clone(), element.clone());
            }
        }
        for tag in &update.removes {
            self.observe(tag);
            self.tombstones.insert(tag.clone());
            self.elements.remove(tag);
        }
    }

    fn observe(&mut self, tag: &Tag) {
        let seen = self.vector.entry(tag.replica.clone()).or_insert(0);
        if tag.counter > *seen {
            *seen = tag.counter;
        }
    }

    /// The visible text, fragments ordered by (order key, tag).
    #[must_use]
    pub fn render(&self) -> String {
        self.visible().map(|(_, element)| element.text.as_str()).collect()
    }

    /// Hash of the visible rendering. Length-prefixed fields keep the
    /// digest unambiguous across fragment boundaries.
    #[must_use]
    pub fn fingerprint(&self) -> Fingerprint {
        let mut hasher = blake3::Hasher::new();
        for (tag, element) in self.visible() {
            let tag_repr = tag.to_string();
            for field in [
                element.order_key.as_str(),
                element.text.as_str(),
                tag_repr.as_str(),
            ] {
                hasher.update(&(field.len() as u64).to_le_bytes());
                hasher.update(field.as_bytes());
            }
        }
        Fingerprint(*hasher.finalize().as_bytes())
    }

    fn visible(&self) -> impl Iterator<Item = (&Tag, &Element)> {
        let mut live: Vec<(&Tag, &Element)> = self
            .elements
            .iter()
            .filter(|(tag, _)| !self.tombstones.contains(tag))
            .collect();
        live.sort_by(|(a_tag, a), (b_tag, b)| {
            a.order_key.cmp(&b.order_key).then_with(|| a_tag.cmp(b_tag))
        });
        live.into_iter()
    }

    /// Replica-to-counter map of incorporated operations.
    #[must_use]
    pub const fn version_vector(&self) -> &BTreeMap<String, u64> {
        &self.vector
    }

    /// Encode the full state (including tombstones) for the snapshot row.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).context("encode document state")
    }

    /// Encode just the version vector for the snapshot row.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode_version_vector(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(&self.vector).context("encode version vector")
    }

    /// Decode a snapshot row's state bytes.
    ///
    /// # Errors
    ///
    /// Fails with [`ErrorCode::SnapshotCorrupt`] on malformed bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .with_context(|| format!("{}: decode document state", ErrorCode::SnapshotCorrupt))
    }
}
