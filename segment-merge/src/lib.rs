//! Columnar segment building and merging: merges many sorted, row-oriented
//! inputs into one dictionary-encoded, bitmap-indexed, memory-mappable
//! segment, built in the idiom of `fff-poc`'s segment encoder.

pub mod adapter;
pub mod aggregator;
pub mod assembler;
pub mod bitmap;
pub mod capability;
pub mod checksum;
pub mod column_serializer;
pub mod container;
pub mod descriptors;
pub mod dimension;
pub mod driver;
pub mod generic_indexed;
pub mod medium;
pub mod options;
pub mod progress;
pub mod reader;
pub mod row_merge;

pub use assembler::{AssembleRequest, MergeResult, SegmentAssembler};
pub use driver::{MultiPhaseDriver, MultiPhaseRequest};
pub use options::{IndexSpec, MergeOptions};
pub use reader::SegmentReaderAdapter;
