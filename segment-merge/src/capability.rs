//! Per-column typing/encoding metadata and the merge contract over it.
//!
//! Follows the `DataType`-and-flags shape used elsewhere in this workspace
//! for builder-style options (see `fff-poc::options::FileWriterOptions`),
//! but the flag algebra itself (tri-state OR/AND with `Unknown` as the
//! identity element) is specific to capability merging.

use segment_core::errors::{Error, Result};

/// A tri-state boolean: unknown absorbs into the identity element of
/// whichever logical operator combines it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriState {
    True,
    False,
    Unknown,
}

impl TriState {
    pub fn or(self, other: TriState) -> TriState {
        use TriState::*;
        match (self, other) {
            (True, _) | (_, True) => True,
            (False, False) => False,
            _ => Unknown,
        }
    }

    pub fn and(self, other: TriState) -> TriState {
        use TriState::*;
        match (self, other) {
            (False, _) | (_, False) => False,
            (True, True) => True,
            _ => Unknown,
        }
    }

    /// Replaces `Unknown` with `default`, used when snapshotting against a
    /// coercion policy.
    pub fn resolve(self, default: bool) -> bool {
        match self {
            TriState::True => true,
            TriState::False => false,
            TriState::Unknown => default,
        }
    }
}

impl From<bool> for TriState {
    fn from(b: bool) -> Self {
        if b {
            TriState::True
        } else {
            TriState::False
        }
    }
}

/// The four column value kinds (dimensions carry their own
/// `elementType`/dictionary facet separately).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueType {
    Time,
    Long,
    Float,
    Double,
    Complex(String),
    String,
}

#[derive(Debug, Clone)]
pub struct ColumnCapabilities {
    pub value_type: ValueType,
    pub element_type: Option<ValueType>,
    pub dictionary_encoded: TriState,
    pub dictionary_values_sorted: TriState,
    pub dictionary_values_unique: TriState,
    pub has_multiple_values: TriState,
    pub has_nulls: TriState,
    pub has_bitmap_indexes: bool,
    pub has_spatial_indexes: bool,
    pub filterable: TriState,
}

impl ColumnCapabilities {
    pub fn dimension(element_type: ValueType) -> Self {
        Self {
            value_type: ValueType::String,
            element_type: Some(element_type),
            dictionary_encoded: TriState::True,
            dictionary_values_sorted: TriState::Unknown,
            dictionary_values_unique: TriState::Unknown,
            has_multiple_values: TriState::Unknown,
            has_nulls: TriState::Unknown,
            has_bitmap_indexes: false,
            has_spatial_indexes: false,
            filterable: TriState::True,
        }
    }

    pub fn metric(value_type: ValueType) -> Self {
        Self {
            value_type,
            element_type: None,
            dictionary_encoded: TriState::False,
            dictionary_values_sorted: TriState::False,
            dictionary_values_unique: TriState::False,
            has_multiple_values: TriState::False,
            has_nulls: TriState::Unknown,
            has_bitmap_indexes: false,
            has_spatial_indexes: false,
            filterable: TriState::False,
        }
    }

    /// Snapshots every tri-state flag to a concrete boolean, replacing
    /// `Unknown` with `coercion`'s default for that flag. Applied once the
    /// cross-input fold in `merge_capabilities_for_column` is complete —
    /// resolving mid-fold would let a default value stand in for a flag an
    /// input later in the fold still has real information about.
    pub fn snapshot(&self, coercion: CoercionPolicy) -> ColumnCapabilities {
        let (dict_encoded, sorted, unique, multi_value, has_nulls, filterable) = coercion.defaults();
        ColumnCapabilities {
            dictionary_encoded: self.dictionary_encoded.resolve(dict_encoded).into(),
            dictionary_values_sorted: self.dictionary_values_sorted.resolve(sorted).into(),
            dictionary_values_unique: self.dictionary_values_unique.resolve(unique).into(),
            has_multiple_values: self.has_multiple_values.resolve(multi_value).into(),
            has_nulls: self.has_nulls.resolve(has_nulls).into(),
            filterable: self.filterable.resolve(filterable).into(),
            ..self.clone()
        }
    }
}

/// Coercion policy applied when snapshotting tri-state flags to concrete
/// booleans for the merged descriptor.
#[derive(Debug, Clone, Copy)]
pub enum CoercionPolicy {
    Dimension,
    Metric,
}

impl CoercionPolicy {
    pub fn defaults(self) -> (bool, bool, bool, bool, bool, bool) {
        // (dict_encoded, sorted, unique, multi_value, has_nulls, filterable)
        match self {
            CoercionPolicy::Dimension => (true, true, true, false, false, true),
            CoercionPolicy::Metric => (false, false, false, false, false, false),
        }
    }
}

/// Folds per-column capabilities across inputs into one.
pub struct CapabilityMerger;

impl CapabilityMerger {
    /// Merges `a` and `b`, either of which may be absent (a column missing
    /// from one input). `column` is used only for error messages. Flags
    /// stay tri-state here — coercion-policy snapshotting happens once the
    /// full cross-input fold is done, via [`ColumnCapabilities::snapshot`].
    pub fn merge(
        column: &str,
        a: Option<&ColumnCapabilities>,
        b: Option<&ColumnCapabilities>,
    ) -> Result<ColumnCapabilities> {
        match (a, b) {
            (None, None) => Err(Error::InvalidInput(format!(
                "cannot merge capabilities for `{column}`: both inputs absent"
            ))),
            (Some(x), None) | (None, Some(x)) => Ok(x.clone()),
            (Some(a), Some(b)) => {
                if a.value_type != b.value_type {
                    return Err(Error::IncompatibleColumnTypes {
                        column: column.to_string(),
                        reason: format!("{:?} vs {:?}", a.value_type, b.value_type),
                    });
                }
                if a.element_type != b.element_type {
                    return Err(Error::IncompatibleColumnTypes {
                        column: column.to_string(),
                        reason: format!(
                            "elementType {:?} vs {:?}",
                            a.element_type, b.element_type
                        ),
                    });
                }
                let has_bitmap_indexes = a.has_bitmap_indexes == b.has_bitmap_indexes
                    && a.has_bitmap_indexes;
                if a.has_bitmap_indexes != b.has_bitmap_indexes {
                    log::debug!(
                        "column `{column}`: hasBitmapIndexes disagreement ({} vs {}), merging to false",
                        a.has_bitmap_indexes,
                        b.has_bitmap_indexes
                    );
                }
                Ok(ColumnCapabilities {
                    value_type: a.value_type.clone(),
                    element_type: a.element_type.clone(),
                    dictionary_encoded: a.dictionary_encoded.or(b.dictionary_encoded),
                    dictionary_values_sorted: a.dictionary_values_sorted.and(b.dictionary_values_sorted),
                    dictionary_values_unique: a.dictionary_values_unique.and(b.dictionary_values_unique),
                    has_multiple_values: a.has_multiple_values.or(b.has_multiple_values),
                    has_nulls: a.has_nulls.or(b.has_nulls),
                    has_bitmap_indexes,
                    has_spatial_indexes: a.has_spatial_indexes || b.has_spatial_indexes,
                    filterable: a.filterable.and(b.filterable),
                })
            }
        }
    }
}
