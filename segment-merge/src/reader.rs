//! Reopens a segment directory the assembler committed, as an
//! `IndexableAdapter`. This is the multi-phase driver's way of feeding an
//! intermediate tier's output back in as an input to the next tier, and
//! the round-trip tests' way of checking a merge actually wrote what it
//! claims to have written.
//!
//! Deliberately not the (out-of-scope, mmap-backed) production segment
//! loader — plain `std::fs` reads, everything materialized eagerly. See
//! DESIGN.md.

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use byteorder::{BigEndian, ReadBytesExt};
use segment_core::errors::{Error, Result};

use crate::adapter::{AdapterRow, DimValue, IndexableAdapter, MetricValue};
use crate::assembler::{reconstruct_original_order, SEGMENT_VERSION};
use crate::capability::{ColumnCapabilities, TriState, ValueType};
use crate::column_serializer::{read_numeric_column, NullHandling, NumericKind};
use crate::container::{read_blob, read_manifest};
use crate::descriptors::{ColumnDescriptor, DescriptorCodec, JsonDescriptorCodec, SegmentizerFactory};
use crate::dimension::read_dimension_payload;
use crate::generic_indexed::read_generic_indexed;

struct ParsedIndexDrd {
    non_null_only_columns: Vec<String>,
    non_null_dims: Vec<String>,
    interval: (i64, i64),
    all_columns_placeholder: Vec<String>,
    all_dims_placeholder: Vec<String>,
}

fn parse_index_drd(bytes: &[u8]) -> Result<ParsedIndexDrd> {
    let mut reader = bytes;
    let non_null_only_columns = read_generic_indexed(&mut reader)?;
    let non_null_dims = read_generic_indexed(&mut reader)?;
    let start = reader.read_i64::<BigEndian>()?;
    let end = reader.read_i64::<BigEndian>()?;
    let serde_id_len = reader.read_u32::<BigEndian>()? as usize;
    let mut serde_id_bytes = vec![0u8; serde_id_len];
    reader.read_exact(&mut serde_id_bytes)?;
    let all_columns_placeholder = read_generic_indexed(&mut reader)?;
    let all_dims_placeholder = read_generic_indexed(&mut reader)?;
    Ok(ParsedIndexDrd {
        non_null_only_columns,
        non_null_dims,
        interval: (start, end),
        all_columns_placeholder,
        all_dims_placeholder,
    })
}

fn parse_column_blob(bytes: &[u8], codec: &JsonDescriptorCodec) -> Result<(ColumnDescriptor, Vec<u8>)> {
    let mut reader = bytes;
    let descriptor_len = reader.read_u32::<BigEndian>()? as usize;
    let mut descriptor_bytes = vec![0u8; descriptor_len];
    reader.read_exact(&mut descriptor_bytes)?;
    let descriptor: ColumnDescriptor = codec.decode(&descriptor_bytes)?;
    Ok((descriptor, reader.to_vec()))
}

fn decode_sketch_values(payload: &[u8], row_count: usize) -> Result<Vec<MetricValue>> {
    if payload.len() != row_count * 16 {
        return Err(Error::ContainerIo(
            "sketchSummary column payload size does not match row_count * 16".to_string(),
        ));
    }
    let mut reader = payload;
    let mut values = Vec::with_capacity(row_count);
    for _ in 0..row_count {
        let count = reader.read_u64::<BigEndian>()?;
        let sum = reader.read_f64::<BigEndian>()?;
        values.push(MetricValue::Complex(serde_json::json!({
            "count": count,
            "sum": sum,
        })));
    }
    Ok(values)
}

/// An `IndexableAdapter` backed by a previously committed segment
/// directory, with every row materialized in memory at `open()` time.
pub struct SegmentReaderAdapter {
    interval: (i64, i64),
    dims: Vec<String>,
    metrics: Vec<String>,
    capabilities: HashMap<String, ColumnCapabilities>,
    complex_type_names: HashMap<String, String>,
    rows: Vec<AdapterRow>,
}

impl SegmentReaderAdapter {
    pub fn open(out_dir: &Path) -> Result<Self> {
        let version_bytes = std::fs::read(out_dir.join("version.bin"))?;
        if version_bytes.len() != 4 {
            return Err(Error::ContainerIo("version.bin is not 4 bytes".to_string()));
        }
        let mut version_slice: &[u8] = &version_bytes[..];
        let version = version_slice.read_i32::<BigEndian>()?;
        if version != SEGMENT_VERSION {
            return Err(Error::ContainerIo(format!(
                "unsupported segment version {version}, expected {SEGMENT_VERSION}"
            )));
        }

        let codec = JsonDescriptorCodec;
        let factory_bytes = std::fs::read(out_dir.join("factory.json"))?;
        let _factory: SegmentizerFactory = codec.decode(&factory_bytes)?;

        let manifest = read_manifest(out_dir)?;
        let index_drd_location = manifest
            .get("index.drd")
            .ok_or_else(|| Error::ContainerIo("segment is missing index.drd".to_string()))?;
        let index_drd_bytes = read_blob(out_dir, index_drd_location)?;
        let parsed = parse_index_drd(&index_drd_bytes)?;

        let metric_count = parsed.non_null_only_columns.len() - parsed.non_null_dims.len();
        let metric_names: Vec<String> = parsed.non_null_only_columns[..metric_count].to_vec();
        let dims: Vec<String> = reconstruct_original_order(&parsed.non_null_dims, &parsed.all_dims_placeholder);

        let time_location = manifest
            .get("__time")
            .ok_or_else(|| Error::ContainerIo("segment is missing __time column".to_string()))?;
        let time_bytes = read_blob(out_dir, time_location)?;
        let (time_descriptor, time_payload) = parse_column_blob(&time_bytes, &codec)?;
        let (time_row_count, time_null_handling) = match time_descriptor {
            ColumnDescriptor::Long { row_count, has_null_bitmap, .. } => (
                row_count as usize,
                if has_null_bitmap { NullHandling::V2 } else { NullHandling::Legacy },
            ),
            other => {
                return Err(Error::ContainerIo(format!(
                    "__time column has unexpected descriptor kind: {other:?}"
                )))
            }
        };
        let time_values = read_numeric_column(
            &mut &time_payload[..],
            NumericKind::Long,
            time_row_count,
            time_null_handling,
        )?;
        let timestamps: Vec<i64> = time_values
            .into_iter()
            .map(|v| match v {
                MetricValue::Long(ts) => Ok(ts),
                other => Err(Error::ContainerIo(format!(
                    "__time column contained a non-long value: {other:?}"
                ))),
            })
            .collect::<Result<_>>()?;
        let row_count = timestamps.len();

        let mut capabilities: HashMap<String, ColumnCapabilities> = HashMap::new();
        let mut complex_type_names: HashMap<String, String> = HashMap::new();
        let mut metric_columns: Vec<Vec<MetricValue>> = Vec::with_capacity(metric_names.len());
        for name in &metric_names {
            let location = manifest
                .get(name)
                .ok_or_else(|| Error::ContainerIo(format!("segment is missing metric column `{name}`")))?;
            let bytes = read_blob(out_dir, location)?;
            let (descriptor, payload) = parse_column_blob(&bytes, &codec)?;
            let (values, value_type) = match &descriptor {
                ColumnDescriptor::Long { row_count, has_null_bitmap, .. } => (
                    read_numeric_column(
                        &mut &payload[..],
                        NumericKind::Long,
                        *row_count as usize,
                        if *has_null_bitmap { NullHandling::V2 } else { NullHandling::Legacy },
                    )?,
                    ValueType::Long,
                ),
                ColumnDescriptor::Float { row_count, has_null_bitmap, .. } => (
                    read_numeric_column(
                        &mut &payload[..],
                        NumericKind::Float,
                        *row_count as usize,
                        if *has_null_bitmap { NullHandling::V2 } else { NullHandling::Legacy },
                    )?,
                    ValueType::Float,
                ),
                ColumnDescriptor::Double { row_count, has_null_bitmap, .. } => (
                    read_numeric_column(
                        &mut &payload[..],
                        NumericKind::Double,
                        *row_count as usize,
                        if *has_null_bitmap { NullHandling::V2 } else { NullHandling::Legacy },
                    )?,
                    ValueType::Double,
                ),
                ColumnDescriptor::Complex { complex_type_name, row_count, .. } => {
                    if complex_type_name != "sketchSummary" {
                        return Err(Error::UnknownComplexType(complex_type_name.clone()));
                    }
                    complex_type_names.insert(name.clone(), complex_type_name.clone());
                    (
                        decode_sketch_values(&payload, *row_count as usize)?,
                        ValueType::Complex(complex_type_name.clone()),
                    )
                }
                other => {
                    return Err(Error::ContainerIo(format!(
                        "metric `{name}` has a non-metric descriptor kind: {other:?}"
                    )))
                }
            };
            capabilities.insert(name.clone(), ColumnCapabilities::metric(value_type));
            metric_columns.push(values);
        }

        let mut dim_columns: HashMap<String, Vec<DimValue>> = HashMap::new();
        for name in &parsed.non_null_dims {
            let location = manifest
                .get(name)
                .ok_or_else(|| Error::ContainerIo(format!("segment is missing dimension column `{name}`")))?;
            let bytes = read_blob(out_dir, location)?;
            let (descriptor, payload) = parse_column_blob(&bytes, &codec)?;
            let (has_multiple_values, has_bitmap_index) = match descriptor {
                ColumnDescriptor::Dimension { has_multiple_values, has_bitmap_index, .. } => {
                    (has_multiple_values, has_bitmap_index)
                }
                other => {
                    return Err(Error::ContainerIo(format!(
                        "dimension `{name}` has a non-dimension descriptor kind: {other:?}"
                    )))
                }
            };
            let decoded = read_dimension_payload(&mut &payload[..])?;
            let values: Vec<DimValue> = decoded
                .encoded_rows
                .iter()
                .map(|ids| match ids.len() {
                    0 => DimValue::Null,
                    1 => DimValue::Single(decoded.dictionary[ids[0] as usize].clone()),
                    _ => DimValue::Multi(
                        ids.iter().map(|&id| decoded.dictionary[id as usize].clone()).collect(),
                    ),
                })
                .collect();

            let mut caps = ColumnCapabilities::dimension(ValueType::String);
            caps.has_multiple_values = TriState::from(has_multiple_values);
            caps.has_bitmap_indexes = has_bitmap_index;
            capabilities.insert(name.clone(), caps);
            dim_columns.insert(name.clone(), values);
        }
        for name in &dims {
            if !dim_columns.contains_key(name) {
                let mut caps = ColumnCapabilities::dimension(ValueType::String);
                caps.has_nulls = TriState::True;
                capabilities.insert(name.clone(), caps);
                dim_columns.insert(name.clone(), vec![DimValue::Null; row_count]);
            }
        }

        let mut rows = Vec::with_capacity(row_count);
        for i in 0..row_count {
            let row_dims = dims.iter().map(|d| dim_columns[d][i].clone()).collect();
            let row_metrics = metric_columns.iter().map(|col| col[i].clone()).collect();
            rows.push(AdapterRow {
                timestamp: timestamps[i],
                dims: row_dims,
                metrics: row_metrics,
            });
        }

        Ok(Self {
            interval: parsed.interval,
            dims,
            metrics: metric_names,
            capabilities,
            complex_type_names,
            rows,
        })
    }
}

impl IndexableAdapter for SegmentReaderAdapter {
    fn interval(&self) -> (i64, i64) {
        self.interval
    }

    fn dimension_names(&self) -> &[String] {
        &self.dims
    }

    fn metric_names(&self) -> &[String] {
        &self.metrics
    }

    fn capabilities(&self, column: &str) -> Option<ColumnCapabilities> {
        self.capabilities.get(column).cloned()
    }

    fn metric_complex_type_name(&self, metric: &str) -> Option<String> {
        self.complex_type_names.get(metric).cloned()
    }

    fn num_rows(&self) -> usize {
        self.rows.len()
    }

    fn rows(&self) -> Box<dyn Iterator<Item = AdapterRow> + '_> {
        Box::new(self.rows.clone().into_iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::{Aggregator, LongSumAggregator};
    use crate::assembler::{AssembleRequest, SegmentAssembler};
    use crate::column_serializer::ComplexMetricSerdeRegistry;
    use crate::options::{IndexSpec, MergeOptions};

    struct FixedAdapter {
        interval: (i64, i64),
        dims: Vec<String>,
        metrics: Vec<String>,
        caps: HashMap<String, ColumnCapabilities>,
        rows: Vec<AdapterRow>,
    }

    impl IndexableAdapter for FixedAdapter {
        fn interval(&self) -> (i64, i64) {
            self.interval
        }
        fn dimension_names(&self) -> &[String] {
            &self.dims
        }
        fn metric_names(&self) -> &[String] {
            &self.metrics
        }
        fn capabilities(&self, column: &str) -> Option<ColumnCapabilities> {
            self.caps.get(column).cloned()
        }
        fn metric_complex_type_name(&self, _metric: &str) -> Option<String> {
            None
        }
        fn num_rows(&self) -> usize {
            self.rows.len()
        }
        fn rows(&self) -> Box<dyn Iterator<Item = AdapterRow> + '_> {
            Box::new(self.rows.clone().into_iter())
        }
    }

    fn no_aggregator(_metric: &str) -> Box<dyn Aggregator> {
        Box::new(LongSumAggregator {
            metric: "m".to_string(),
        })
    }

    #[test]
    fn round_trips_a_committed_segment() {
        let adapter = FixedAdapter {
            interval: (0, 30),
            dims: vec!["a".to_string()],
            metrics: vec!["m".to_string()],
            caps: HashMap::from([
                ("a".to_string(), ColumnCapabilities::dimension(ValueType::String)),
                ("m".to_string(), ColumnCapabilities::metric(ValueType::Long)),
            ]),
            rows: vec![
                AdapterRow {
                    timestamp: 10,
                    dims: vec![DimValue::Single("1".to_string())],
                    metrics: vec![MetricValue::Long(5)],
                },
                AdapterRow {
                    timestamp: 20,
                    dims: vec![DimValue::Single("2".to_string())],
                    metrics: vec![MetricValue::Long(7)],
                },
            ],
        };

        let dir = tempfile::tempdir().unwrap();
        let out_dir = dir.path().join("seg");
        let options = MergeOptions::builder().set_rollup(false).build();
        let index_spec = IndexSpec::default();
        let registry = ComplexMetricSerdeRegistry::with_defaults();
        SegmentAssembler::make_index_files(AssembleRequest {
            inputs: vec![&adapter as &dyn IndexableAdapter],
            out_dir: out_dir.clone(),
            options: &options,
            index_spec: &index_spec,
            aggregator_factory: &no_aggregator,
            complex_registry: &registry,
            dims_spec: None,
            segmentizer_factory: None,
            query_granularity_millis: None,
            ingestion_timestamp_millis: None,
            requested_metrics: None,
            progress: None,
        })
        .unwrap();

        let reopened = SegmentReaderAdapter::open(&out_dir).unwrap();
        assert_eq!(reopened.interval(), (0, 30));
        assert_eq!(reopened.dimension_names(), &["a".to_string()]);
        assert_eq!(reopened.metric_names(), &["m".to_string()]);
        assert_eq!(reopened.num_rows(), 2);

        let rows: Vec<AdapterRow> = reopened.rows().collect();
        assert_eq!(rows[0].timestamp, 10);
        assert_eq!(rows[0].dims[0], DimValue::Single("1".to_string()));
        assert_eq!(rows[0].metrics[0], MetricValue::Long(5));
        assert_eq!(rows[1].timestamp, 20);
        assert_eq!(rows[1].metrics[0], MetricValue::Long(7));
    }
}
