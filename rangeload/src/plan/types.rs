//! Part and object metadata types.

use std::collections::BTreeMap;
use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Identifier of a part of a remote object.
///
/// Part ids are numeric and ordered numerically, so part `"2"` sorts before
/// part `"10"` even though metadata carries them as strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PartId(u64);

impl PartId {
    /// Create a part id from its numeric value.
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// The numeric value of this id.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PartId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PartId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<u64>().map(Self)
    }
}

impl TryFrom<String> for PartId {
    type Error = ParseIntError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PartId> for String {
    fn from(id: PartId) -> Self {
        id.to_string()
    }
}

/// Lifecycle of the remote object itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectState {
    /// Still being written remotely.
    Open,
    /// Being finalized remotely.
    Closing,
    /// Immutable and complete.
    #[default]
    Closed,
}

/// Size and state of a remote object, resolved once per attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStatus {
    /// Total size in bytes.
    pub size: u64,

    /// Remote lifecycle state.
    #[serde(default)]
    pub state: ObjectState,

    /// Digest of the whole object, used when no part table is available.
    #[serde(default, alias = "md5", skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

impl FileStatus {
    /// Status of a closed object of the given size without a digest.
    pub fn new(size: u64) -> Self {
        Self {
            size,
            state: ObjectState::Closed,
            digest: None,
        }
    }

    /// Attach a whole-object digest.
    pub fn with_digest(mut self, digest: impl Into<String>) -> Self {
        self.digest = Some(digest.into());
        self
    }
}

/// Declared metadata of one part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartMeta {
    /// Declared size in bytes.
    pub size: u64,

    /// Expected digest (lowercase hex), if the metadata supplies one.
    #[serde(default, alias = "md5", skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

impl PartMeta {
    /// Part metadata with a digest.
    pub fn new(size: u64, digest: impl Into<String>) -> Self {
        Self {
            size,
            digest: Some(digest.into()),
        }
    }

    /// Part metadata that cannot be verified.
    pub fn unverified(size: u64) -> Self {
        Self { size, digest: None }
    }
}

/// Ordered table of part metadata, keyed by part id.
///
/// Deserializes from the usual JSON shape:
///
/// ```
/// # use rangeload::plan::PartTable;
/// let table: PartTable =
///     serde_json::from_str(r#"{"1": {"size": 300, "md5": "abc", "state": "complete"}}"#).unwrap();
/// assert_eq!(table.len(), 1);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartTable(BTreeMap<PartId, PartMeta>);

impl PartTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a part.
    pub fn insert(&mut self, id: PartId, meta: PartMeta) {
        self.0.insert(id, meta);
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with_part(mut self, id: u64, meta: PartMeta) -> Self {
        self.insert(PartId::new(id), meta);
        self
    }

    /// Number of parts.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the table has no parts.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Sum of declared part sizes, or `None` if it does not fit in a `u64`.
    pub fn total_size(&self) -> Option<u64> {
        self.0
            .values()
            .try_fold(0u64, |total, meta| total.checked_add(meta.size))
    }

    /// Parts in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = (&PartId, &PartMeta)> {
        self.0.iter()
    }

    /// Parse a JSON part manifest.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

impl FromIterator<(PartId, PartMeta)> for PartTable {
    fn from_iter<T: IntoIterator<Item = (PartId, PartMeta)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Local lifecycle of a part within a download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartState {
    /// Not yet fetched.
    Pending,
    /// Already present locally and verified during resume.
    Verified,
    /// Chunks are being received.
    Fetching,
    /// All bytes received and checked.
    Complete,
}

/// A part with its computed position inside the object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part {
    /// Part id.
    pub id: PartId,
    /// Declared size in bytes.
    pub size: u64,
    /// Byte offset of the first byte of this part.
    pub offset: u64,
    /// Expected digest, if any.
    pub digest: Option<String>,
    /// Local lifecycle state.
    pub state: PartState,
}

impl Part {
    /// Offset one past the last byte of this part.
    ///
    /// Saturates at `u64::MAX`; planned parts never get there because the
    /// planner rejects layouts whose sizes overflow.
    pub fn end(&self) -> u64 {
        self.offset.saturating_add(self.size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_part_id_numeric_ordering() {
        let two: PartId = "2".parse().unwrap();
        let ten: PartId = "10".parse().unwrap();
        assert!(two < ten);
        assert_eq!(ten.to_string(), "10");
    }

    #[test]
    fn test_part_id_rejects_non_numeric() {
        assert!("abc".parse::<PartId>().is_err());
    }

    #[test]
    fn test_part_table_from_json_sorts_numerically() {
        let json = r#"{
            "10": {"size": 5, "md5": "a"},
            "2": {"size": 7},
            "1": {"size": 3, "digest": "c", "state": "complete"}
        }"#;
        let table = PartTable::from_json(json).unwrap();

        let ids: Vec<u64> = table.iter().map(|(id, _)| id.get()).collect();
        assert_eq!(ids, vec![1, 2, 10]);
        assert_eq!(table.total_size(), Some(15));

        let (_, first) = table.iter().next().unwrap();
        assert_eq!(first.digest.as_deref(), Some("c"));
    }

    #[test]
    fn test_total_size_overflow_is_none() {
        let table = PartTable::from_json(r#"{"1": {"size": 18446744073709551615}, "2": {"size": 101}}"#)
            .unwrap();
        assert_eq!(table.total_size(), None);
    }

    #[test]
    fn test_part_end_saturates() {
        let part = Part {
            id: PartId::new(1),
            size: 10,
            offset: u64::MAX - 5,
            digest: None,
            state: PartState::Pending,
        };
        assert_eq!(part.end(), u64::MAX);
    }

    #[test]
    fn test_file_status_defaults() {
        let status: FileStatus = serde_json::from_str(r#"{"size": 42}"#).unwrap();
        assert_eq!(status.size, 42);
        assert_eq!(status.state, ObjectState::Closed);
        assert!(status.digest.is_none());

        let open: FileStatus = serde_json::from_str(r#"{"size": 1, "state": "open"}"#).unwrap();
        assert_eq!(open.state, ObjectState::Open);
    }

    #[test]
    fn test_part_end() {
        let part = Part {
            id: PartId::new(1),
            size: 100,
            offset: 200,
            digest: None,
            state: PartState::Pending,
        };
        assert_eq!(part.end(), 300);
    }
}
