//! On-disk / in-memory record format shared by the file and process-local backends.

use std::time::Duration;

use rkyv::rancor::Error as RkyvError;
use rkyv::util::AlignedVec;
use rkyv::{Archive, Deserialize, Serialize};

use super::error::{BackendError, BackendResult};
use crate::hashing::payload_checksum;

/// A stored cache entry.
///
/// Stored as `rkyv` bytes by the file backend and kept as-is by the
/// process-local backend. An entry past `expires_at` is logically absent even
/// before it is physically purged.
#[derive(Archive, Deserialize, Serialize, Debug, PartialEq, Clone)]
pub struct StoredRecord {
    /// Encoded value.
    pub payload: Vec<u8>,
    /// Tags attached at save time (empty = untagged).
    pub tags: Vec<String>,
    /// Unix millis after which the entry is absent; `None` = never.
    pub expires_at: Option<i64>,
    /// BLAKE3 of `payload`, checked on read.
    pub checksum: [u8; 32],
}

impl StoredRecord {
    /// Builds a record expiring `ttl` after `now_ms`.
    pub fn new(payload: &[u8], tags: &[String], ttl: Option<Duration>, now_ms: i64) -> Self {
        Self {
            payload: payload.to_vec(),
            tags: tags.to_vec(),
            expires_at: ttl.map(|ttl| {
                now_ms.saturating_add(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX))
            }),
            checksum: payload_checksum(payload),
        }
    }

    /// Returns `true` once `now_ms` has reached the expiry time.
    #[inline]
    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.expires_at.is_some_and(|at| now_ms >= at)
    }

    /// Returns `true` if the payload still matches its checksum.
    #[inline]
    pub fn is_intact(&self) -> bool {
        payload_checksum(&self.payload) == self.checksum
    }

    /// Returns `true` if the record carries any of `tags`.
    pub fn has_any_tag(&self, tags: &[String]) -> bool {
        self.tags.iter().any(|t| tags.contains(t))
    }

    /// Serializes the record.
    pub fn to_bytes(&self) -> BackendResult<AlignedVec> {
        rkyv::to_bytes::<RkyvError>(self).map_err(|e| BackendError::Serialization(e.to_string()))
    }

    /// Deserializes a record, copying into an aligned buffer first.
    pub fn from_bytes(bytes: &[u8]) -> BackendResult<Self> {
        let mut aligned = AlignedVec::<16>::with_capacity(bytes.len());
        aligned.extend_from_slice(bytes);
        rkyv::from_bytes::<StoredRecord, RkyvError>(&aligned)
            .map_err(|e| BackendError::Serialization(e.to_string()))
    }
}

/// Current wall-clock time in unix millis.
#[inline]
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
