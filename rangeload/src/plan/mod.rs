//! Part layout and chunk planning.
//!
//! A remote object is a sequence of contiguous parts, each with a declared
//! size and optionally an expected digest. [`ChunkPlan`] places the parts at
//! their byte offsets and splits the pending ones into bounded
//! [`ChunkRequest`]s:
//!
//! ```text
//! object  |<------------- part 1 ------------->|<---- part 2 ---->|
//! chunks  |  0..=99  | 100..=199 | 200..=299   | 300..=399 | 400.. |
//! ```
//!
//! # Example
//!
//! ```
//! use rangeload::plan::{ChunkPlan, FileStatus};
//!
//! let plan = ChunkPlan::new(&FileStatus::new(300), None, 100).unwrap();
//! let spans: Vec<_> = plan
//!     .chunk_requests(&plan.part_ids())
//!     .map(|r| (r.start, r.end))
//!     .collect();
//! assert_eq!(spans, vec![(0, 99), (100, 199), (200, 299)]);
//! ```

mod planner;
mod types;

pub use planner::{ChunkPlan, ChunkRequest, ChunkRequests, SYNTHETIC_PART_ID};
pub use types::{FileStatus, ObjectState, Part, PartId, PartMeta, PartState, PartTable};
