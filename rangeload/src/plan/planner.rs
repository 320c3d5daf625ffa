//! Part layout and chunk request planning.

use std::collections::VecDeque;

use super::types::{FileStatus, Part, PartId, PartMeta, PartState, PartTable};
use crate::error::{DownloadError, DownloadResult};

/// Id of the synthetic part used when an object has no part table.
pub const SYNTHETIC_PART_ID: PartId = PartId::new(1);

/// A byte-range fetch for one segment of a part.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRequest {
    /// Part the segment belongs to.
    pub part: PartId,
    /// First byte offset (inclusive).
    pub start: u64,
    /// Last byte offset (inclusive).
    pub end: u64,
}

impl ChunkRequest {
    /// Number of bytes covered by this request.
    pub fn span(&self) -> u64 {
        self.end - self.start + 1
    }
}

/// The part layout of one object and the segment size used to fetch it.
///
/// Offsets are derived from part sizes in ascending id order, so the same
/// metadata always produces the same layout.
#[derive(Debug, Clone)]
pub struct ChunkPlan {
    parts: Vec<Part>,
    total_size: u64,
    chunk_size: u64,
}

impl ChunkPlan {
    /// Compute the part layout.
    ///
    /// # Arguments
    ///
    /// * `status` - Size and state of the remote object
    /// * `table` - Part metadata; `None` plans a single synthetic part covering
    ///   the whole object, carrying the object digest if there is one
    /// * `chunk_size` - Maximum bytes per chunk request
    ///
    /// # Errors
    ///
    /// Returns `InvalidLayout` if the declared part sizes don't add up to the
    /// object size, if the table is empty for a non-empty object, or if the
    /// chunk size is zero.
    pub fn new(
        status: &FileStatus,
        table: Option<&PartTable>,
        chunk_size: u64,
    ) -> DownloadResult<Self> {
        if chunk_size == 0 {
            return Err(DownloadError::InvalidLayout {
                reason: "chunk size must be greater than 0".to_string(),
            });
        }

        let synthetic;
        let table = match table {
            Some(table) => table,
            None => {
                synthetic = PartTable::new().with_part(
                    SYNTHETIC_PART_ID.get(),
                    PartMeta {
                        size: status.size,
                        digest: status.digest.clone(),
                    },
                );
                &synthetic
            }
        };

        if table.is_empty() {
            if status.size == 0 {
                return Ok(Self {
                    parts: Vec::new(),
                    total_size: 0,
                    chunk_size,
                });
            }
            return Err(DownloadError::InvalidLayout {
                reason: format!("no parts declared for an object of {} bytes", status.size),
            });
        }

        let declared = table
            .total_size()
            .ok_or_else(|| DownloadError::InvalidLayout {
                reason: "part sizes overflow a 64-bit byte count".to_string(),
            })?;
        if declared != status.size {
            return Err(DownloadError::InvalidLayout {
                reason: format!(
                    "part sizes add up to {} bytes but the object is {} bytes",
                    declared, status.size
                ),
            });
        }

        let mut offset = 0u64;
        let mut parts = Vec::with_capacity(table.len());
        for (id, meta) in table.iter() {
            parts.push(Part {
                id: *id,
                size: meta.size,
                offset,
                digest: meta.digest.clone(),
                state: PartState::Pending,
            });
            offset = offset
                .checked_add(meta.size)
                .ok_or_else(|| DownloadError::InvalidLayout {
                    reason: format!("part {} ends past the largest byte offset", id),
                })?;
        }

        Ok(Self {
            parts,
            total_size: status.size,
            chunk_size,
        })
    }

    /// Parts in id order.
    pub fn parts(&self) -> &[Part] {
        &self.parts
    }

    /// Look up a part by id.
    pub fn part(&self, id: PartId) -> Option<&Part> {
        self.parts
            .binary_search_by_key(&id, |part| part.id)
            .ok()
            .map(|index| &self.parts[index])
    }

    /// Update the lifecycle state of a part.
    pub fn set_state(&mut self, id: PartId, state: PartState) {
        if let Ok(index) = self.parts.binary_search_by_key(&id, |part| part.id) {
            self.parts[index].state = state;
        }
    }

    /// Ids of all parts in order.
    pub fn part_ids(&self) -> Vec<PartId> {
        self.parts.iter().map(|part| part.id).collect()
    }

    /// Total object size in bytes.
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Segment size used for chunk requests.
    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Whether a request must carry a Range header.
    ///
    /// Only a request spanning an entire single-part object goes without one,
    /// which lets the transport apply compression.
    pub fn needs_range_header(&self, request: &ChunkRequest) -> bool {
        if self.parts.len() > 1 || request.start > 0 {
            return true;
        }
        match self.part(request.part) {
            Some(part) => request.span() < part.size,
            None => true,
        }
    }

    /// Lazily generate chunk requests for the given parts.
    ///
    /// Parts are visited in the order given; unknown ids are skipped. The
    /// returned iterator owns its data, so a new one can be created for every
    /// attempt.
    pub fn chunk_requests(&self, pending: &[PartId]) -> ChunkRequests {
        let ranges = pending
            .iter()
            .filter_map(|id| self.part(*id))
            .map(|part| (part.id, part.offset, part.end()))
            .collect();

        ChunkRequests {
            ranges,
            cursor: None,
            chunk_size: self.chunk_size,
        }
    }
}

/// Iterator over the chunk requests of a set of parts.
#[derive(Debug, Clone)]
pub struct ChunkRequests {
    /// Remaining `(part, start, end_exclusive)` ranges.
    ranges: VecDeque<(PartId, u64, u64)>,
    /// Next start offset inside the front range.
    cursor: Option<u64>,
    chunk_size: u64,
}

impl Iterator for ChunkRequests {
    type Item = ChunkRequest;

    fn next(&mut self) -> Option<ChunkRequest> {
        loop {
            let &(part, start, end) = self.ranges.front()?;
            let chunk_start = self.cursor.unwrap_or(start);

            if chunk_start >= end {
                self.ranges.pop_front();
                self.cursor = None;
                continue;
            }

            let chunk_end = chunk_start.saturating_add(self.chunk_size).min(end);
            self.cursor = Some(chunk_end);

            return Some(ChunkRequest {
                part,
                start: chunk_start,
                end: chunk_end - 1,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn request(part: u64, start: u64, end: u64) -> ChunkRequest {
        ChunkRequest {
            part: PartId::new(part),
            start,
            end,
        }
    }

    #[test]
    fn test_single_part_three_chunks() {
        let status = FileStatus::new(300);
        let table = PartTable::new().with_part(1, PartMeta::unverified(300));
        let plan = ChunkPlan::new(&status, Some(&table), 100).unwrap();

        let requests: Vec<_> = plan.chunk_requests(&plan.part_ids()).collect();
        assert_eq!(
            requests,
            vec![request(1, 0, 99), request(1, 100, 199), request(1, 200, 299)]
        );
    }

    #[test]
    fn test_last_segment_shorter() {
        let status = FileStatus::new(250);
        let plan = ChunkPlan::new(&status, None, 100).unwrap();

        let requests: Vec<_> = plan.chunk_requests(&plan.part_ids()).collect();
        assert_eq!(requests.last(), Some(&request(1, 200, 249)));
        assert_eq!(requests.len(), 3);
    }

    #[test]
    fn test_synthetic_part_carries_object_digest() {
        let status = FileStatus::new(10).with_digest("abc");
        let plan = ChunkPlan::new(&status, None, 4).unwrap();

        assert_eq!(plan.parts().len(), 1);
        let part = &plan.parts()[0];
        assert_eq!(part.id, SYNTHETIC_PART_ID);
        assert_eq!(part.size, 10);
        assert_eq!(part.digest.as_deref(), Some("abc"));
    }

    #[test]
    fn test_offsets_follow_numeric_order() {
        let status = FileStatus::new(60);
        let table = PartTable::new()
            .with_part(10, PartMeta::unverified(30))
            .with_part(2, PartMeta::unverified(20))
            .with_part(1, PartMeta::unverified(10));
        let plan = ChunkPlan::new(&status, Some(&table), 8).unwrap();

        let layout: Vec<_> = plan.parts().iter().map(|p| (p.id.get(), p.offset)).collect();
        assert_eq!(layout, vec![(1, 0), (2, 10), (10, 30)]);
    }

    #[test]
    fn test_inconsistent_sizes_rejected() {
        let status = FileStatus::new(100);
        let table = PartTable::new().with_part(1, PartMeta::unverified(99));

        let result = ChunkPlan::new(&status, Some(&table), 10);
        assert!(matches!(result, Err(DownloadError::InvalidLayout { .. })));
    }

    #[test]
    fn test_overflowing_part_sizes_rejected() {
        let status = FileStatus::new(100);
        let table = PartTable::new()
            .with_part(1, PartMeta::unverified(u64::MAX))
            .with_part(2, PartMeta::unverified(101));

        let result = ChunkPlan::new(&status, Some(&table), 10);
        match result {
            Err(DownloadError::InvalidLayout { reason }) => assert!(reason.contains("overflow")),
            other => panic!("expected InvalidLayout, got {:?}", other),
        }
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        let result = ChunkPlan::new(&FileStatus::new(10), None, 0);
        assert!(matches!(result, Err(DownloadError::InvalidLayout { .. })));
    }

    #[test]
    fn test_empty_object_has_no_requests() {
        let plan = ChunkPlan::new(&FileStatus::new(0), None, 10).unwrap();
        assert_eq!(plan.chunk_requests(&plan.part_ids()).count(), 0);
    }

    #[test]
    fn test_chunk_requests_only_cover_pending_parts() {
        let status = FileStatus::new(30);
        let table = PartTable::new()
            .with_part(1, PartMeta::unverified(10))
            .with_part(2, PartMeta::unverified(10))
            .with_part(3, PartMeta::unverified(10));
        let plan = ChunkPlan::new(&status, Some(&table), 10).unwrap();

        let pending = [PartId::new(2), PartId::new(3)];
        let requests: Vec<_> = plan.chunk_requests(&pending).collect();
        assert_eq!(requests, vec![request(2, 10, 19), request(3, 20, 29)]);
    }

    #[test]
    fn test_chunk_requests_restartable() {
        let plan = ChunkPlan::new(&FileStatus::new(50), None, 20).unwrap();
        let ids = plan.part_ids();

        let first: Vec<_> = plan.chunk_requests(&ids).collect();
        let second: Vec<_> = plan.chunk_requests(&ids).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_range_header_omitted_only_for_whole_single_part() {
        let plan = ChunkPlan::new(&FileStatus::new(100), None, 100).unwrap();
        assert!(!plan.needs_range_header(&request(1, 0, 99)));

        let chunked = ChunkPlan::new(&FileStatus::new(100), None, 50).unwrap();
        assert!(chunked.needs_range_header(&request(1, 0, 49)));
        assert!(chunked.needs_range_header(&request(1, 50, 99)));

        let table = PartTable::new()
            .with_part(1, PartMeta::unverified(50))
            .with_part(2, PartMeta::unverified(50));
        let multi = ChunkPlan::new(&FileStatus::new(100), Some(&table), 100).unwrap();
        assert!(multi.needs_range_header(&request(1, 0, 49)));
    }

    #[test]
    fn test_set_state() {
        let mut plan = ChunkPlan::new(&FileStatus::new(10), None, 10).unwrap();
        plan.set_state(SYNTHETIC_PART_ID, PartState::Verified);
        assert_eq!(plan.parts()[0].state, PartState::Verified);
    }

    proptest! {
        #[test]
        fn prop_layout_is_contiguous(
            sizes in prop::collection::vec(0u64..5_000, 1..12),
            chunk_size in 1u64..2_048,
        ) {
            let table: PartTable = sizes
                .iter()
                .enumerate()
                .map(|(i, size)| (PartId::new(i as u64 + 1), PartMeta::unverified(*size)))
                .collect();
            let total: u64 = sizes.iter().sum();
            let plan = ChunkPlan::new(&FileStatus::new(total), Some(&table), chunk_size).unwrap();

            let mut expected_offset = 0;
            for part in plan.parts() {
                prop_assert_eq!(part.offset, expected_offset);
                expected_offset = part.end();
            }
            prop_assert_eq!(expected_offset, total);

            let mut next = 0;
            for req in plan.chunk_requests(&plan.part_ids()) {
                let part = plan.part(req.part).unwrap();
                prop_assert_eq!(req.start, next);
                prop_assert!(req.span() <= chunk_size);
                prop_assert!(req.start >= part.offset && req.end < part.end());
                next = req.end + 1;
            }
            prop_assert_eq!(next, total);
        }
    }
}
