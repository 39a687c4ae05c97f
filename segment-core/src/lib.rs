//! Shared error/result types for the segment merge engine, split out the
//! way `fff-core` is split from `fff-poc`.

pub mod errors;
