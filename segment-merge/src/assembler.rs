//! Segment Assembler: the single-segment build sequence, from schema
//! validation through writing `index.drd`/`metadata.drd` and closing the
//! container. Follows the `FileWriter::try_new`/row-group-flush
//! orchestration shape in `fff-poc::writer` — one top-level driver that
//! opens every column writer, walks the merged row stream once, then
//! flushes each writer's bytes through the container — generalized here
//! from a single `RecordBatch` stream to an n-way merge with optional
//! rollup.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::path::PathBuf;

use byteorder::{BigEndian, WriteBytesExt};
use segment_core::errors::{Error, Result};

use crate::adapter::{ColumnReorderWrapper, IndexableAdapter, MetricValue, RowPointer, INVALID_ROW};
use crate::aggregator::Aggregator;
use crate::bitmap::BitmapFactory;
use crate::capability::{CapabilityMerger, ColumnCapabilities, CoercionPolicy, ValueType};
use crate::column_serializer::{
    ColumnSerializer, ComplexColumnSerializer, ComplexMetricSerdeRegistry, NullHandling,
    NumericColumnSerializer,
};
use crate::container::ContainerWriter;
use crate::descriptors::{
    declared_type_name, ColumnDescriptor, DescriptorCodec, JsonDescriptorCodec, Metadata,
    SegmentizerFactory,
};
use crate::dimension::DictionaryDimensionMerger;
use crate::generic_indexed::write_generic_indexed;
use crate::options::{DimensionsSpecInspector, IndexSpec, MergeOptions};
use crate::progress::{LoggingProgressIndicator, ProgressIndicator};
use crate::row_merge::{MergingRowIterator, RowCombiningTimeAndDimsIterator, TimeAndDimsIterator};

/// Segment format version written to `version.bin`.
pub const SEGMENT_VERSION: i32 = 9;

/// One `make_index_files` invocation's parameters, grouped into a struct
/// rather than a long argument list the way `FileWriterOptions` groups its
/// builder-settable knobs.
pub struct AssembleRequest<'a> {
    pub inputs: Vec<&'a dyn IndexableAdapter>,
    pub out_dir: PathBuf,
    pub options: &'a MergeOptions,
    pub index_spec: &'a IndexSpec,
    /// Builds the combining aggregator for a metric name; only consulted
    /// when `options.rollup()` is true.
    pub aggregator_factory: &'a dyn Fn(&str) -> Box<dyn Aggregator>,
    pub complex_registry: &'a ComplexMetricSerdeRegistry,
    pub dims_spec: Option<&'a dyn DimensionsSpecInspector>,
    pub segmentizer_factory: Option<SegmentizerFactory>,
    pub query_granularity_millis: Option<i64>,
    pub ingestion_timestamp_millis: Option<i64>,
    /// If given, every name must resolve to a unified metric, or the merge
    /// fails with `InvalidInput`.
    pub requested_metrics: Option<Vec<String>>,
    pub progress: Option<&'a mut dyn ProgressIndicator>,
}

/// What a successful merge produced: useful to callers directly, and to
/// the multi-phase driver chaining tiers together.
pub struct MergeResult {
    pub out_dir: PathBuf,
    pub row_count: usize,
    /// Per-input row-number conversion buffers.
    pub conversions: Vec<Vec<i64>>,
    /// Dimensions that were actually materialized (null-only, omitted
    /// dimensions are not included).
    pub dimension_names: Vec<String>,
    pub metric_names: Vec<String>,
    pub interval: (i64, i64),
}

pub struct SegmentAssembler;

impl SegmentAssembler {
    /// Runs the single-segment build sequence against `request`: validate
    /// schema compatibility, merge rows, write columns, then the index and
    /// metadata blobs.
    pub fn make_index_files<'a>(request: AssembleRequest<'a>) -> Result<MergeResult> {
        let AssembleRequest {
            inputs,
            out_dir,
            options,
            index_spec,
            aggregator_factory,
            complex_registry,
            dims_spec,
            segmentizer_factory,
            query_granularity_millis,
            ingestion_timestamp_millis,
            requested_metrics,
            progress,
        } = request;

        if inputs.is_empty() {
            return Err(Error::InvalidInput("cannot merge zero inputs".to_string()));
        }

        let mut default_progress = LoggingProgressIndicator;
        let progress: &mut dyn ProgressIndicator = match progress {
            Some(p) => p,
            None => &mut default_progress,
        };
        progress.start();

        // Step 1: unify schema and capabilities.
        let (unified_dims, unified_metrics) = unify_columns(&inputs)?;

        if let Some(requested) = &requested_metrics {
            for metric in requested {
                if !unified_metrics.contains(metric) {
                    return Err(Error::InvalidInput(format!(
                        "requested metric `{metric}` is absent from every input"
                    )));
                }
            }
        }

        let interval = {
            let mut start = i64::MAX;
            let mut end = i64::MIN;
            for adapter in &inputs {
                let (s, e) = adapter.interval();
                start = start.min(s);
                end = end.max(e);
            }
            (start, end)
        };

        let dim_caps: HashMap<String, ColumnCapabilities> = unified_dims
            .iter()
            .map(|d| {
                merge_capabilities_for_column(d, &inputs, CoercionPolicy::Dimension)
                    .map(|caps| (d.clone(), caps))
            })
            .collect::<Result<_>>()?;
        let metric_caps: HashMap<String, ColumnCapabilities> = unified_metrics
            .iter()
            .map(|m| {
                merge_capabilities_for_column(m, &inputs, CoercionPolicy::Metric)
                    .map(|caps| (m.clone(), caps))
            })
            .collect::<Result<_>>()?;

        // Step 2/3: scoped medium (implicit: the container below is the
        // only resource this merge needs beyond process memory) plus
        // version.bin/factory.json.
        std::fs::create_dir_all(&out_dir)?;
        write_version_and_factory(&out_dir, segmentizer_factory)?;

        // Step 4: dictionary phase, one dimension merger per unified dim.
        progress.start_section("dictionaries");
        let mut dim_mergers: Vec<DictionaryDimensionMerger> = unified_dims
            .iter()
            .map(|d| DictionaryDimensionMerger::new(d.clone()))
            .collect();
        for (merger, name) in dim_mergers.iter_mut().zip(unified_dims.iter()) {
            merger.write_merged_value_dictionary(&inputs, dim_caps[name].clone())?;
        }
        progress.stop_section("dictionaries");

        let null_handling = index_spec.null_handling();
        let bitmap_factory = index_spec.bitmap_factory();

        let mut time_serializer = NumericColumnSerializer::long(null_handling, Some(bitmap_factory));
        time_serializer.open()?;

        let mut metric_serializers: Vec<Box<dyn ColumnSerializer + 'a>> =
            Vec::with_capacity(unified_metrics.len());
        for name in &unified_metrics {
            let caps = &metric_caps[name];
            let mut serializer =
                make_metric_serializer(name, caps, null_handling, bitmap_factory, complex_registry)?;
            serializer.open()?;
            metric_serializers.push(serializer);
        }

        let aggregators: Vec<Box<dyn Aggregator>> = if options.rollup() {
            unified_metrics.iter().map(|m| aggregator_factory(m)).collect()
        } else {
            Vec::new()
        };

        // Step 5: row merge iterator, built from column-reordered sources.
        let sources: Vec<Box<dyn Iterator<Item = RowPointer> + 'a>> = inputs
            .iter()
            .enumerate()
            .map(|(i, adapter)| {
                Box::new(ColumnReorderWrapper::new(*adapter, i, &unified_dims, &unified_metrics))
                    as Box<dyn Iterator<Item = RowPointer> + 'a>
            })
            .collect();
        let merging = MergingRowIterator::new(sources);
        let mut iterator: Box<dyn TimeAndDimsIterator + 'a> = if options.rollup() {
            Box::new(RowCombiningTimeAndDimsIterator::new(merging, aggregators))
        } else {
            Box::new(merging)
        };

        if !iterator.supports_row_conversion() {
            return Err(Error::UnsupportedIteratorForConversion);
        }

        // Step 6: walk the merged stream once.
        progress.start_section("row walk");
        let mut conversions: Vec<Vec<i64>> =
            inputs.iter().map(|a| Vec::with_capacity(a.num_rows())).collect();
        let mut row_count: usize = 0;
        while iterator.move_to_next() {
            let ts = iterator.current_timestamp();
            if ts < interval.0 || ts >= interval.1 {
                return Err(Error::InvalidInput(format!(
                    "row timestamp {ts} falls outside the merged interval [{}, {})",
                    interval.0, interval.1
                )));
            }
            time_serializer.serialize(&MetricValue::Long(ts))?;

            let metrics = iterator.current_metrics();
            for (serializer, value) in metric_serializers.iter_mut().zip(metrics.iter()) {
                serializer.serialize(value)?;
            }

            let dims = iterator.current_dims();
            for (merger, value) in dim_mergers.iter_mut().zip(dims.iter()) {
                merger.process_merged_row(value)?;
            }

            for (input_idx, min, max) in iterator.current_origins() {
                pad_and_set_range(&mut conversions[input_idx], min, max, row_count as i64);
            }

            row_count += 1;
            progress.progress();
        }
        progress.stop_section("row walk");
        drop(iterator);

        if row_count == 0 {
            return Err(Error::InvalidInput("cannot persist an empty index".to_string()));
        }

        // Step 7/8/9/10/11: flush columns, index.drd, metadata.drd, close.
        let mut container = ContainerWriter::new_with_checksum(
            &out_dir,
            options.max_container_file_size(),
            index_spec.checksum_type(),
        )?;
        let codec = JsonDescriptorCodec;

        progress.start_section("flush");
        flush_time_column(&mut container, &time_serializer, row_count, null_handling, &codec)?;

        for (name, serializer) in unified_metrics.iter().zip(metric_serializers.iter()) {
            let caps = metric_caps[name].clone();
            flush_metric_column(
                &mut container,
                name,
                caps,
                serializer.as_ref(),
                row_count,
                null_handling,
                &codec,
            )?;
        }

        let mut non_null_dims: Vec<String> = Vec::new();
        for (name, merger) in unified_dims.iter().zip(dim_mergers.iter_mut()) {
            merger.write_indexes(&conversions, bitmap_factory)?;
            if !merger.has_only_nulls() {
                non_null_dims.push(name.clone());
                let descriptor = merger.make_column_descriptor();
                let mut payload = Vec::new();
                merger.write_payload(&mut payload)?;
                write_column_blob(&mut container, name, &descriptor, &payload, &codec)?;
            } else if should_store_null_only(name, options, dims_spec) {
                let declared_type = declared_type_name(
                    dim_caps[name].element_type.as_ref().unwrap_or(&ValueType::String),
                );
                let descriptor = ColumnDescriptor::NullOnly {
                    name: name.clone(),
                    row_count: row_count as u64,
                    declared_type,
                };
                write_column_blob(&mut container, name, &descriptor, &[], &codec)?;
            }
        }
        progress.stop_section("flush");

        write_index_drd(
            &mut container,
            &unified_dims,
            &unified_metrics,
            &non_null_dims,
            interval,
            bitmap_factory.serde_identifier(),
        )?;

        if options.rollup() || query_granularity_millis.is_some() || ingestion_timestamp_millis.is_some() {
            let metadata = Metadata {
                rollup: options.rollup(),
                aggregator_names: if options.rollup() {
                    unified_metrics
                        .iter()
                        .map(|m| aggregator_factory(m).name().to_string())
                        .collect()
                } else {
                    Vec::new()
                },
                query_granularity_millis,
                ingestion_timestamp_millis,
            };
            let metadata_bytes = codec.encode(&metadata)?;
            container.add("metadata.drd", &metadata_bytes)?;
        }

        container.close()?;
        progress.stop();

        Ok(MergeResult {
            out_dir,
            row_count,
            conversions,
            dimension_names: non_null_dims,
            metric_names: unified_metrics,
            interval,
        })
    }
}

/// Open question resolution: without a `DimensionsSpec`,
/// a null-only dimension is never stored, regardless of
/// `store_empty_columns`/`include_all_dimensions`. See DESIGN.md.
fn should_store_null_only(
    name: &str,
    options: &MergeOptions,
    dims_spec: Option<&dyn DimensionsSpecInspector>,
) -> bool {
    if !options.store_empty_columns() {
        return false;
    }
    match dims_spec {
        None => false,
        Some(spec) => options.include_all_dimensions() || spec.is_explicitly_declared(name),
    }
}

fn unify_columns(inputs: &[&dyn IndexableAdapter]) -> Result<(Vec<String>, Vec<String>)> {
    let mut dims = Vec::new();
    let mut dim_set = HashSet::new();
    for adapter in inputs {
        for d in adapter.dimension_names() {
            if dim_set.insert(d.clone()) {
                dims.push(d.clone());
            }
        }
    }
    let mut metrics = Vec::new();
    let mut metric_set = HashSet::new();
    for adapter in inputs {
        for m in adapter.metric_names() {
            if metric_set.insert(m.clone()) {
                metrics.push(m.clone());
            }
        }
    }
    for d in &dims {
        if metric_set.contains(d) {
            return Err(Error::InvalidInput(format!(
                "column `{d}` is declared as both a dimension and a metric"
            )));
        }
    }
    Ok((dims, metrics))
}

fn merge_capabilities_for_column(
    column: &str,
    inputs: &[&dyn IndexableAdapter],
    coercion: CoercionPolicy,
) -> Result<ColumnCapabilities> {
    let mut acc: Option<ColumnCapabilities> = None;
    for adapter in inputs {
        let caps = adapter.capabilities(column);
        if acc.is_none() && caps.is_none() {
            continue;
        }
        acc = Some(CapabilityMerger::merge(column, acc.as_ref(), caps.as_ref())?);
    }
    let merged = acc.ok_or_else(|| {
        Error::InvalidInput(format!("no input provides capabilities for column `{column}`"))
    })?;
    // Snapshot against the coercion policy only now that every input has
    // folded in — doing it per-pair would let a default stand in for a
    // flag a later input still had real information about.
    Ok(merged.snapshot(coercion))
}

/// Pads `buf` with `INVALID_ROW` up to (not including) `min`, then sets
/// every position in `[min, max]` to `out_row`.
fn pad_and_set_range(buf: &mut Vec<i64>, min: usize, max: usize, out_row: i64) {
    while buf.len() < min {
        buf.push(INVALID_ROW);
    }
    while buf.len() <= max {
        buf.push(out_row);
    }
}

fn make_metric_serializer<'a>(
    name: &str,
    caps: &ColumnCapabilities,
    null_handling: NullHandling,
    bitmap_factory: &'static dyn BitmapFactory,
    complex_registry: &'a ComplexMetricSerdeRegistry,
) -> Result<Box<dyn ColumnSerializer + 'a>> {
    match &caps.value_type {
        ValueType::Long => Ok(Box::new(NumericColumnSerializer::long(
            null_handling,
            Some(bitmap_factory),
        ))),
        ValueType::Float => Ok(Box::new(NumericColumnSerializer::float(
            null_handling,
            Some(bitmap_factory),
        ))),
        ValueType::Double => Ok(Box::new(NumericColumnSerializer::double(
            null_handling,
            Some(bitmap_factory),
        ))),
        ValueType::Complex(type_name) => {
            let serde = complex_registry.get(type_name)?;
            Ok(Box::new(ComplexColumnSerializer::new(type_name.clone(), serde)))
        }
        other => Err(Error::InvalidInput(format!(
            "metric `{name}` has non-metric value type {other:?}"
        ))),
    }
}

fn flush_time_column(
    container: &mut ContainerWriter,
    serializer: &NumericColumnSerializer<'static>,
    row_count: usize,
    null_handling: NullHandling,
    codec: &JsonDescriptorCodec,
) -> Result<()> {
    let mut payload = Vec::with_capacity(serializer.serialized_size());
    serializer.write_to(&mut payload)?;
    let descriptor = ColumnDescriptor::Long {
        name: "__time".to_string(),
        row_count: row_count as u64,
        has_null_bitmap: null_handling == NullHandling::V2,
    };
    write_column_blob(container, "__time", &descriptor, &payload, codec)
}

fn flush_metric_column(
    container: &mut ContainerWriter,
    name: &str,
    caps: ColumnCapabilities,
    serializer: &dyn ColumnSerializer,
    row_count: usize,
    null_handling: NullHandling,
    codec: &JsonDescriptorCodec,
) -> Result<()> {
    let mut payload = Vec::with_capacity(serializer.serialized_size());
    serializer.write_to(&mut payload)?;
    let has_null_bitmap = null_handling == NullHandling::V2;
    let descriptor = match caps.value_type {
        ValueType::Long => ColumnDescriptor::Long {
            name: name.to_string(),
            row_count: row_count as u64,
            has_null_bitmap,
        },
        ValueType::Float => ColumnDescriptor::Float {
            name: name.to_string(),
            row_count: row_count as u64,
            has_null_bitmap,
        },
        ValueType::Double => ColumnDescriptor::Double {
            name: name.to_string(),
            row_count: row_count as u64,
            has_null_bitmap,
        },
        ValueType::Complex(type_name) => ColumnDescriptor::Complex {
            name: name.to_string(),
            complex_type_name: type_name,
            row_count: row_count as u64,
        },
        other => {
            return Err(Error::InvalidInput(format!(
                "metric `{name}` has non-metric value type {other:?}"
            )))
        }
    };
    write_column_blob(container, name, &descriptor, &payload, codec)
}

fn write_column_blob(
    container: &mut ContainerWriter,
    name: &str,
    descriptor: &ColumnDescriptor,
    payload: &[u8],
    codec: &JsonDescriptorCodec,
) -> Result<()> {
    let descriptor_bytes = codec.encode(descriptor)?;
    let mut blob = Vec::with_capacity(4 + descriptor_bytes.len() + payload.len());
    blob.write_u32::<BigEndian>(descriptor_bytes.len() as u32)?;
    blob.extend_from_slice(&descriptor_bytes);
    blob.extend_from_slice(payload);
    container.add(name, &blob)
}

/// `index.drd`: non-null columns/dimensions, interval, bitmap
/// serde id, then the two positional null-placeholder vectors.
fn write_index_drd(
    container: &mut ContainerWriter,
    unified_dims: &[String],
    unified_metrics: &[String],
    non_null_dims: &[String],
    interval: (i64, i64),
    bitmap_serde_id: &str,
) -> Result<()> {
    let non_null_dim_set: HashSet<&str> = non_null_dims.iter().map(|s| s.as_str()).collect();
    let mut non_null_only_columns: Vec<String> = unified_metrics.to_vec();
    non_null_only_columns.extend(non_null_dims.iter().cloned());
    let non_null_column_set: HashSet<&str> =
        non_null_only_columns.iter().map(|s| s.as_str()).collect();

    // Must share the non-null vector's ordering (metrics first, then
    // dims) — `reconstruct_original_order` fills the k-th empty
    // placeholder slot with the k-th non-null name, so the two vectors
    // have to walk the same column order or the zip misaligns.
    let original_order: Vec<String> = unified_metrics
        .iter()
        .chain(unified_dims.iter())
        .cloned()
        .collect();
    let all_columns_placeholder: Vec<String> = original_order
        .iter()
        .map(|n| {
            if non_null_column_set.contains(n.as_str()) {
                String::new()
            } else {
                n.clone()
            }
        })
        .collect();
    let all_dims_placeholder: Vec<String> = unified_dims
        .iter()
        .map(|d| {
            if non_null_dim_set.contains(d.as_str()) {
                String::new()
            } else {
                d.clone()
            }
        })
        .collect();

    let mut buf = Vec::new();
    write_generic_indexed(&mut buf, &non_null_only_columns)?;
    write_generic_indexed(&mut buf, non_null_dims)?;
    buf.write_i64::<BigEndian>(interval.0)?;
    buf.write_i64::<BigEndian>(interval.1)?;
    buf.write_u32::<BigEndian>(bitmap_serde_id.len() as u32)?;
    buf.extend_from_slice(bitmap_serde_id.as_bytes());
    write_generic_indexed(&mut buf, &all_columns_placeholder)?;
    write_generic_indexed(&mut buf, &all_dims_placeholder)?;
    container.add("index.drd", &buf)
}

fn write_version_and_factory(
    out_dir: &std::path::Path,
    factory: Option<SegmentizerFactory>,
) -> Result<()> {
    let mut version_file = File::create(out_dir.join("version.bin"))?;
    version_file.write_i32::<BigEndian>(SEGMENT_VERSION)?;
    let factory = factory.unwrap_or_else(SegmentizerFactory::default_mmap);
    let codec = JsonDescriptorCodec;
    let factory_bytes = codec.encode(&factory)?;
    std::fs::write(out_dir.join("factory.json"), &factory_bytes)?;
    Ok(())
}

/// Reconstructs the original user-declared column order by zipping a
/// non-null vector with its positional null-placeholder vector: an empty placeholder slot means "take the next
/// non-null name", a non-empty slot is itself the name at that position.
pub fn reconstruct_original_order(non_null: &[String], placeholder: &[String]) -> Vec<String> {
    let mut non_null_iter = non_null.iter();
    placeholder
        .iter()
        .map(|slot| {
            if slot.is_empty() {
                non_null_iter.next().expect("placeholder/non-null vectors out of sync").clone()
            } else {
                slot.clone()
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{AdapterRow, DimValue};
    use crate::aggregator::LongSumAggregator;
    use crate::capability::ValueType;
    use crate::options::ExplicitDimensionsSpec;

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

    fn long_metric_caps() -> ColumnCapabilities {
        ColumnCapabilities::metric(ValueType::Long)
    }

    fn dim_caps() -> ColumnCapabilities {
        ColumnCapabilities::dimension(ValueType::String)
    }

    fn no_aggregator(_metric: &str) -> Box<dyn Aggregator> {
        Box::new(LongSumAggregator {
            metric: "m".to_string(),
        })
    }

    #[test]
    fn s1_two_rows_no_rollup() {
        let adapter = FixedAdapter {
            interval: (0, 30),
            dims: vec!["a".to_string()],
            metrics: vec!["m".to_string()],
            caps: HashMap::from([("a".to_string(), dim_caps()), ("m".to_string(), long_metric_caps())]),
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
        let options = MergeOptions::builder().set_rollup(false).build();
        let index_spec = IndexSpec::default();
        let registry = ComplexMetricSerdeRegistry::with_defaults();
        let result = SegmentAssembler::make_index_files(AssembleRequest {
            inputs: vec![&adapter as &dyn IndexableAdapter],
            out_dir: dir.path().join("seg"),
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

        assert_eq!(result.row_count, 2);
        assert_eq!(result.conversions, vec![vec![0i64, 1i64]]);
        assert!(dir.path().join("seg/version.bin").exists());
        assert!(dir.path().join("seg/factory.json").exists());
        assert!(dir.path().join("seg/meta.smoosh").exists());
    }

    #[test]
    fn s2_rollup_combines_equal_keys() {
        let input0 = FixedAdapter {
            interval: (0, 20),
            dims: vec!["d".to_string()],
            metrics: vec!["m".to_string()],
            caps: HashMap::from([("d".to_string(), dim_caps()), ("m".to_string(), long_metric_caps())]),
            rows: vec![AdapterRow {
                timestamp: 10,
                dims: vec![DimValue::Single("x".to_string())],
                metrics: vec![MetricValue::Long(5)],
            }],
        };
        let input1 = FixedAdapter {
            interval: (0, 20),
            dims: vec!["d".to_string()],
            metrics: vec!["m".to_string()],
            caps: HashMap::from([("d".to_string(), dim_caps()), ("m".to_string(), long_metric_caps())]),
            rows: vec![
                AdapterRow {
                    timestamp: 10,
                    dims: vec![DimValue::Single("x".to_string())],
                    metrics: vec![MetricValue::Long(7)],
                },
                AdapterRow {
                    timestamp: 10,
                    dims: vec![DimValue::Single("y".to_string())],
                    metrics: vec![MetricValue::Long(2)],
                },
            ],
        };

        let dir = tempfile::tempdir().unwrap();
        let options = MergeOptions::builder().set_rollup(true).build();
        let index_spec = IndexSpec::default();
        let registry = ComplexMetricSerdeRegistry::with_defaults();
        let aggregator_factory = |name: &str| -> Box<dyn Aggregator> {
            Box::new(LongSumAggregator {
                metric: name.to_string(),
            })
        };
        let result = SegmentAssembler::make_index_files(AssembleRequest {
            inputs: vec![
                &input0 as &dyn IndexableAdapter,
                &input1 as &dyn IndexableAdapter,
            ],
            out_dir: dir.path().join("seg"),
            options: &options,
            index_spec: &index_spec,
            aggregator_factory: &aggregator_factory,
            complex_registry: &registry,
            dims_spec: None,
            segmentizer_factory: None,
            query_granularity_millis: None,
            ingestion_timestamp_millis: None,
            requested_metrics: None,
            progress: None,
        })
        .unwrap();

        assert_eq!(result.row_count, 2);
        assert_eq!(result.conversions[0], vec![0i64]);
        assert_eq!(result.conversions[1], vec![0i64, 1i64]);
    }

    #[test]
    fn s3_null_only_dim_stored_only_when_spec_opts_in() {
        let adapter = FixedAdapter {
            interval: (0, 20),
            dims: vec!["z".to_string()],
            metrics: vec!["m".to_string()],
            caps: HashMap::from([("z".to_string(), dim_caps()), ("m".to_string(), long_metric_caps())]),
            rows: vec![AdapterRow {
                timestamp: 10,
                dims: vec![DimValue::Null],
                metrics: vec![MetricValue::Long(1)],
            }],
        };

        let dir = tempfile::tempdir().unwrap();
        let options_store = MergeOptions::builder()
            .set_rollup(false)
            .set_store_empty_columns(true)
            .set_include_all_dimensions(true)
            .build();
        let index_spec = IndexSpec::default();
        let registry = ComplexMetricSerdeRegistry::with_defaults();

        let result = SegmentAssembler::make_index_files(AssembleRequest {
            inputs: vec![&adapter as &dyn IndexableAdapter],
            out_dir: dir.path().join("stored"),
            options: &options_store,
            index_spec: &index_spec,
            aggregator_factory: &no_aggregator,
            complex_registry: &registry,
            dims_spec: Some(&ExplicitDimensionsSpec::new(["z".to_string()])),
            segmentizer_factory: None,
            query_granularity_millis: None,
            ingestion_timestamp_millis: None,
            requested_metrics: None,
            progress: None,
        })
        .unwrap();
        assert!(result.dimension_names.is_empty(), "z has only nulls, never non-null-only");

        // Without a DimensionsSpec at all, the null-only column is never
        // stored even though store_empty_columns/include_all_dimensions
        // are both true (the open question's resolution).
        let options_store2 = options_store.clone();
        let dir2 = tempfile::tempdir().unwrap();
        let result2 = SegmentAssembler::make_index_files(AssembleRequest {
            inputs: vec![&adapter as &dyn IndexableAdapter],
            out_dir: dir2.path().join("unstored"),
            options: &options_store2,
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
        assert!(result2.dimension_names.is_empty());
    }

    #[test]
    fn s4_type_mismatch_fails() {
        let input0 = FixedAdapter {
            interval: (0, 20),
            dims: vec![],
            metrics: vec!["m".to_string()],
            caps: HashMap::from([("m".to_string(), ColumnCapabilities::metric(ValueType::Long))]),
            rows: vec![AdapterRow {
                timestamp: 10,
                dims: vec![],
                metrics: vec![MetricValue::Long(1)],
            }],
        };
        let input1 = FixedAdapter {
            interval: (0, 20),
            dims: vec![],
            metrics: vec!["m".to_string()],
            caps: HashMap::from([("m".to_string(), ColumnCapabilities::metric(ValueType::Double))]),
            rows: vec![AdapterRow {
                timestamp: 12,
                dims: vec![],
                metrics: vec![MetricValue::Double(1.0)],
            }],
        };

        let dir = tempfile::tempdir().unwrap();
        let options = MergeOptions::builder().set_rollup(false).build();
        let index_spec = IndexSpec::default();
        let registry = ComplexMetricSerdeRegistry::with_defaults();
        let err = SegmentAssembler::make_index_files(AssembleRequest {
            inputs: vec![
                &input0 as &dyn IndexableAdapter,
                &input1 as &dyn IndexableAdapter,
            ],
            out_dir: dir.path().join("seg"),
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
        .unwrap_err();
        assert!(matches!(err, Error::IncompatibleColumnTypes { .. }));
    }

    #[test]
    fn s6_bitmap_flag_disagreement_merges_to_false() {
        let mut no_bitmap_caps = dim_caps();
        no_bitmap_caps.has_bitmap_indexes = false;
        let mut bitmap_caps = dim_caps();
        bitmap_caps.has_bitmap_indexes = true;

        let input0 = FixedAdapter {
            interval: (0, 20),
            dims: vec!["z".to_string()],
            metrics: vec!["m".to_string()],
            caps: HashMap::from([
                ("z".to_string(), no_bitmap_caps),
                ("m".to_string(), long_metric_caps()),
            ]),
            rows: vec![AdapterRow {
                timestamp: 10,
                dims: vec![DimValue::Null],
                metrics: vec![MetricValue::Long(1)],
            }],
        };
        let input1 = FixedAdapter {
            interval: (0, 20),
            dims: vec!["z".to_string()],
            metrics: vec!["m".to_string()],
            caps: HashMap::from([
                ("z".to_string(), bitmap_caps),
                ("m".to_string(), long_metric_caps()),
            ]),
            rows: vec![AdapterRow {
                timestamp: 12,
                dims: vec![DimValue::Single("x".to_string())],
                metrics: vec![MetricValue::Long(2)],
            }],
        };

        let dir = tempfile::tempdir().unwrap();
        let options = MergeOptions::builder().set_rollup(false).build();
        let index_spec = IndexSpec::default();
        let registry = ComplexMetricSerdeRegistry::with_defaults();
        SegmentAssembler::make_index_files(AssembleRequest {
            inputs: vec![
                &input0 as &dyn IndexableAdapter,
                &input1 as &dyn IndexableAdapter,
            ],
            out_dir: dir.path().join("seg"),
            options: &options,
            index_spec: &index_spec,
            aggregator_factory: &no_aggregator,
            complex_registry: &registry,
            dims_spec: Some(&ExplicitDimensionsSpec::new(["z".to_string()])),
            segmentizer_factory: None,
            query_granularity_millis: None,
            ingestion_timestamp_millis: None,
            requested_metrics: None,
            progress: None,
        })
        .unwrap();

        let reopened = crate::reader::SegmentReaderAdapter::open(&dir.path().join("seg")).unwrap();
        let merged_caps = reopened.capabilities("z").unwrap();
        assert!(!merged_caps.has_bitmap_indexes);
    }

    #[test]
    fn empty_input_list_rejected() {
        let options = MergeOptions::default();
        let index_spec = IndexSpec::default();
        let registry = ComplexMetricSerdeRegistry::with_defaults();
        let dir = tempfile::tempdir().unwrap();
        let err = SegmentAssembler::make_index_files(AssembleRequest {
            inputs: vec![],
            out_dir: dir.path().join("seg"),
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
        .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn requested_metric_absent_from_inputs_fails() {
        let adapter = FixedAdapter {
            interval: (0, 20),
            dims: vec![],
            metrics: vec!["m".to_string()],
            caps: HashMap::from([("m".to_string(), long_metric_caps())]),
            rows: vec![AdapterRow {
                timestamp: 10,
                dims: vec![],
                metrics: vec![MetricValue::Long(1)],
            }],
        };
        let dir = tempfile::tempdir().unwrap();
        let options = MergeOptions::builder().set_rollup(false).build();
        let index_spec = IndexSpec::default();
        let registry = ComplexMetricSerdeRegistry::with_defaults();
        let err = SegmentAssembler::make_index_files(AssembleRequest {
            inputs: vec![&adapter as &dyn IndexableAdapter],
            out_dir: dir.path().join("seg"),
            options: &options,
            index_spec: &index_spec,
            aggregator_factory: &no_aggregator,
            complex_registry: &registry,
            dims_spec: None,
            segmentizer_factory: None,
            query_granularity_millis: None,
            ingestion_timestamp_millis: None,
            requested_metrics: Some(vec!["does-not-exist".to_string()]),
            progress: None,
        })
        .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn column_order_zip_reconstructs_original_order() {
        let non_null = vec!["b".to_string(), "d".to_string()];
        let placeholder = vec!["a".to_string(), String::new(), "c".to_string(), String::new()];
        let reconstructed = reconstruct_original_order(&non_null, &placeholder);
        assert_eq!(
            reconstructed,
            vec!["a".to_string(), "b".to_string(), "c".to_string(), "d".to_string()]
        );
    }

    #[test]
    fn index_drd_placeholder_matches_emitted_non_null_order() {
        // Concrete regression case: metrics=["m"], dims=["d1" (non-null),
        // "z" (null-only, stored)]. `write_index_drd` must emit the
        // `allColumns` placeholder in the same metrics-first order as
        // `non_null_only_columns`, or the zip in `reconstruct_original_order`
        // misaligns and swaps `d1`/`z`.
        use crate::container::{read_blob, read_manifest};
        use crate::generic_indexed::read_generic_indexed;
        use byteorder::ReadBytesExt;
        use std::io::Read as _;

        let dir = tempfile::tempdir().unwrap();
        let mut container = ContainerWriter::new(dir.path(), 1 << 20).unwrap();
        write_index_drd(
            &mut container,
            &["d1".to_string(), "z".to_string()],
            &["m".to_string()],
            &["d1".to_string()],
            (0, 20),
            "roaring",
        )
        .unwrap();
        container.close().unwrap();

        let manifest = read_manifest(dir.path()).unwrap();
        let bytes = read_blob(dir.path(), &manifest["index.drd"]).unwrap();
        let mut reader: &[u8] = &bytes;
        let non_null_only_columns = read_generic_indexed(&mut reader).unwrap();
        let _non_null_dims = read_generic_indexed(&mut reader).unwrap();
        reader.read_i64::<BigEndian>().unwrap();
        reader.read_i64::<BigEndian>().unwrap();
        let serde_id_len = reader.read_u32::<BigEndian>().unwrap() as usize;
        let mut _serde_id_bytes = vec![0u8; serde_id_len];
        reader.read_exact(&mut _serde_id_bytes).unwrap();
        let all_columns_placeholder = read_generic_indexed(&mut reader).unwrap();

        assert_eq!(non_null_only_columns, vec!["m".to_string(), "d1".to_string()]);
        let reconstructed = reconstruct_original_order(&non_null_only_columns, &all_columns_placeholder);
        assert_eq!(reconstructed, vec!["m".to_string(), "d1".to_string(), "z".to_string()]);
    }

    /// A fake iterator that opts out of row-conversion support, the only
    /// shape that would make the assembler's `UnsupportedIteratorForConversion`
    /// check fire — no such iterator ships in this
    /// crate, so this test exercises the trait contract in isolation.
    struct NoProvenanceIterator;

    impl TimeAndDimsIterator for NoProvenanceIterator {
        fn move_to_next(&mut self) -> bool {
            false
        }
        fn current_timestamp(&self) -> i64 {
            0
        }
        fn current_dims(&self) -> &[DimValue] {
            &[]
        }
        fn current_metrics(&self) -> &[MetricValue] {
            &[]
        }
        fn current_origins(&self) -> Vec<(usize, usize, usize)> {
            Vec::new()
        }
        fn supports_row_conversion(&self) -> bool {
            false
        }
    }

    #[test]
    fn iterator_without_provenance_is_rejected() {
        let iterator = NoProvenanceIterator;
        assert!(!iterator.supports_row_conversion());
    }
}
