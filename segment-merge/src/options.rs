//! `IndexSpec`/`MergeOptions` configuration, mirroring the
//! `FileWriterOptions`/`FileWriterOptionsBuilder` idiom in
//! `fff-poc::options`: an immutable options struct built through a
//! consuming builder with chained setters, with a `with_defaults()`/
//! `Default` pair.

use std::collections::HashSet;

use crate::bitmap::{BitmapFactory, RoaringBitmapFactory};
use crate::checksum::ChecksumType;
use crate::column_serializer::NullHandling;

pub const DEFAULT_MAX_CONTAINER_FILE_SIZE: u64 = 2 * 1024 * 1024 * 1024; // 2GiB
pub const DEFAULT_MAX_COLUMNS_TO_MERGE: usize = 500;

/// Bundles the bitmap-factory selection, null-handling mode, checksum
/// type, and dimensions-spec-driven storage flags the assembler consults
/// at each "should I store this column" decision point.
#[derive(Clone)]
pub struct IndexSpec {
    bitmap_factory: &'static dyn BitmapFactory,
    null_handling: NullHandling,
    checksum_type: ChecksumType,
}

impl Default for IndexSpec {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl IndexSpec {
    pub fn builder() -> IndexSpecBuilder {
        IndexSpecBuilder::with_defaults()
    }

    pub fn bitmap_factory(&self) -> &'static dyn BitmapFactory {
        self.bitmap_factory
    }

    pub fn null_handling(&self) -> NullHandling {
        self.null_handling
    }

    pub fn checksum_type(&self) -> ChecksumType {
        self.checksum_type
    }
}

pub struct IndexSpecBuilder {
    bitmap_factory: &'static dyn BitmapFactory,
    null_handling: NullHandling,
    checksum_type: ChecksumType,
}

impl IndexSpecBuilder {
    pub fn with_defaults() -> Self {
        Self {
            bitmap_factory: &RoaringBitmapFactory,
            null_handling: NullHandling::V2,
            checksum_type: ChecksumType::XxHash,
        }
    }

    pub fn build(self) -> IndexSpec {
        IndexSpec {
            bitmap_factory: self.bitmap_factory,
            null_handling: self.null_handling,
            checksum_type: self.checksum_type,
        }
    }

    pub fn set_bitmap_factory(mut self, bitmap_factory: &'static dyn BitmapFactory) -> Self {
        self.bitmap_factory = bitmap_factory;
        self
    }

    pub fn set_null_handling(mut self, null_handling: NullHandling) -> Self {
        self.null_handling = null_handling;
        self
    }

    pub fn set_checksum_type(mut self, checksum_type: ChecksumType) -> Self {
        self.checksum_type = checksum_type;
        self
    }
}

/// Top-level merge configuration: rollup behavior, container sizing, the
/// intermediate/final `IndexSpec` pair the multi-phase driver switches
/// between, and the dimensions-spec-driven storage flags.
#[derive(Clone)]
pub struct MergeOptions {
    rollup: bool,
    max_container_file_size: u64,
    max_columns_to_merge: usize,
    intermediate_index_spec: IndexSpec,
    final_index_spec: IndexSpec,
    store_empty_columns: bool,
    include_all_dimensions: bool,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl MergeOptions {
    pub fn builder() -> MergeOptionsBuilder {
        MergeOptionsBuilder::with_defaults()
    }

    pub fn rollup(&self) -> bool {
        self.rollup
    }

    pub fn max_container_file_size(&self) -> u64 {
        self.max_container_file_size
    }

    pub fn max_columns_to_merge(&self) -> usize {
        self.max_columns_to_merge
    }

    pub fn intermediate_index_spec(&self) -> &IndexSpec {
        &self.intermediate_index_spec
    }

    pub fn final_index_spec(&self) -> &IndexSpec {
        &self.final_index_spec
    }

    /// Whether a null-only dimension with no `DimensionsSpec` entry should
    /// still get a placeholder column. The `true ∧ no dimensions-spec ∧
    /// !include_all_dimensions` combination resolves to "do not store" —
    /// see DESIGN.md.
    pub fn store_empty_columns(&self) -> bool {
        self.store_empty_columns
    }

    pub fn include_all_dimensions(&self) -> bool {
        self.include_all_dimensions
    }
}

pub struct MergeOptionsBuilder {
    rollup: bool,
    max_container_file_size: u64,
    max_columns_to_merge: usize,
    intermediate_index_spec: IndexSpec,
    final_index_spec: IndexSpec,
    store_empty_columns: bool,
    include_all_dimensions: bool,
}

impl MergeOptionsBuilder {
    pub fn with_defaults() -> Self {
        Self {
            rollup: true,
            max_container_file_size: DEFAULT_MAX_CONTAINER_FILE_SIZE,
            max_columns_to_merge: DEFAULT_MAX_COLUMNS_TO_MERGE,
            intermediate_index_spec: IndexSpec::default(),
            final_index_spec: IndexSpec::default(),
            store_empty_columns: false,
            include_all_dimensions: false,
        }
    }

    pub fn build(self) -> MergeOptions {
        MergeOptions {
            rollup: self.rollup,
            max_container_file_size: self.max_container_file_size,
            max_columns_to_merge: self.max_columns_to_merge,
            intermediate_index_spec: self.intermediate_index_spec,
            final_index_spec: self.final_index_spec,
            store_empty_columns: self.store_empty_columns,
            include_all_dimensions: self.include_all_dimensions,
        }
    }

    pub fn set_rollup(mut self, rollup: bool) -> Self {
        self.rollup = rollup;
        self
    }

    pub fn set_max_container_file_size(mut self, max_container_file_size: u64) -> Self {
        self.max_container_file_size = max_container_file_size;
        self
    }

    pub fn set_max_columns_to_merge(mut self, max_columns_to_merge: usize) -> Self {
        self.max_columns_to_merge = max_columns_to_merge;
        self
    }

    pub fn set_intermediate_index_spec(mut self, spec: IndexSpec) -> Self {
        self.intermediate_index_spec = spec;
        self
    }

    pub fn set_final_index_spec(mut self, spec: IndexSpec) -> Self {
        self.final_index_spec = spec;
        self
    }

    pub fn set_store_empty_columns(mut self, store_empty_columns: bool) -> Self {
        self.store_empty_columns = store_empty_columns;
        self
    }

    pub fn set_include_all_dimensions(mut self, include_all_dimensions: bool) -> Self {
        self.include_all_dimensions = include_all_dimensions;
        self
    }
}

/// The "dimensions-spec inspector" collaborator: tells the assembler
/// whether a dimension was explicitly declared by the
/// user, which gates whether an otherwise all-null column still gets a
/// placeholder. Absent entirely (`None` at the call site) when the caller
/// never supplied a dimensions spec — see the open question's resolution
/// in DESIGN.md: that case always means "do not store", regardless of
/// `store_empty_columns`/`include_all_dimensions`.
pub trait DimensionsSpecInspector {
    fn is_explicitly_declared(&self, dimension: &str) -> bool;
}

/// A concrete inspector backed by a fixed set of user-declared dimension
/// names, the common case (an ingestion spec that names its dimensions).
pub struct ExplicitDimensionsSpec(HashSet<String>);

impl ExplicitDimensionsSpec {
    pub fn new(dimensions: impl IntoIterator<Item = String>) -> Self {
        Self(dimensions.into_iter().collect())
    }
}

impl DimensionsSpecInspector for ExplicitDimensionsSpec {
    fn is_explicitly_declared(&self, dimension: &str) -> bool {
        self.0.contains(dimension)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_enable_rollup_and_v2_null_handling() {
        let options = MergeOptions::default();
        assert!(options.rollup());
        assert_eq!(
            options.final_index_spec().null_handling(),
            NullHandling::V2
        );
    }

    #[test]
    fn builder_overrides_apply() {
        let options = MergeOptions::builder()
            .set_rollup(false)
            .set_max_columns_to_merge(8)
            .build();
        assert!(!options.rollup());
        assert_eq!(options.max_columns_to_merge(), 8);
    }

    #[test]
    fn explicit_dimensions_spec_only_recognizes_named_dimensions() {
        let spec = ExplicitDimensionsSpec::new(["country".to_string()]);
        assert!(spec.is_explicitly_declared("country"));
        assert!(!spec.is_explicitly_declared("city"));
    }
}
