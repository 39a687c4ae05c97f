//! JSON-serialized descriptor blobs embedded in the segment.
//! `DescriptorCodec` plays the role of an `ObjectMapper`-like JSON
//! encoder collaborator; `JsonDescriptorCodec` is the concrete,
//! `serde_json`-backed implementation, following this workspace's use of
//! `serde`/`serde_json` for its (non-flatbuffer) side-channel metadata.

use segment_core::errors::Result;
use serde::{Deserialize, Serialize};

use crate::capability::ValueType;

/// A column's on-disk shape, one tagged variant per column kind.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind")]
pub enum ColumnDescriptor {
    Long {
        name: String,
        row_count: u64,
        has_null_bitmap: bool,
    },
    Float {
        name: String,
        row_count: u64,
        has_null_bitmap: bool,
    },
    Double {
        name: String,
        row_count: u64,
        has_null_bitmap: bool,
    },
    Complex {
        name: String,
        complex_type_name: String,
        row_count: u64,
    },
    Dimension {
        name: String,
        row_count: u64,
        cardinality: u64,
        has_multiple_values: bool,
        has_bitmap_index: bool,
    },
    /// Materialized only when the dimensions-spec inspector opts in for an
    /// otherwise-all-null column.
    NullOnly {
        name: String,
        row_count: u64,
        declared_type: String,
    },
}

impl ColumnDescriptor {
    pub fn name(&self) -> &str {
        match self {
            ColumnDescriptor::Long { name, .. }
            | ColumnDescriptor::Float { name, .. }
            | ColumnDescriptor::Double { name, .. }
            | ColumnDescriptor::Complex { name, .. }
            | ColumnDescriptor::Dimension { name, .. }
            | ColumnDescriptor::NullOnly { name, .. } => name,
        }
    }
}

pub fn declared_type_name(value_type: &ValueType) -> String {
    match value_type {
        ValueType::Time => "LONG".to_string(),
        ValueType::Long => "LONG".to_string(),
        ValueType::Float => "FLOAT".to_string(),
        ValueType::Double => "DOUBLE".to_string(),
        ValueType::Complex(name) => name.clone(),
        ValueType::String => "STRING".to_string(),
    }
}

/// `factory.json`: which segmentizer should load this segment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SegmentizerFactory {
    #[serde(rename = "type")]
    pub factory_type: String,
}

impl SegmentizerFactory {
    pub fn default_mmap() -> Self {
        Self {
            factory_type: "mMapSegmentFactory".to_string(),
        }
    }
}

/// `metadata.drd`: rollup/aggregation bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Metadata {
    pub rollup: bool,
    pub aggregator_names: Vec<String>,
    pub query_granularity_millis: Option<i64>,
    pub ingestion_timestamp_millis: Option<i64>,
}

/// The `ObjectMapper`-like collaborator interface.
pub trait DescriptorCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>>;
    fn decode<T: for<'de> Deserialize<'de>>(&self, bytes: &[u8]) -> Result<T>;
}

pub struct JsonDescriptorCodec;

impl DescriptorCodec for JsonDescriptorCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn decode<T: for<'de> Deserialize<'de>>(&self, bytes: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
