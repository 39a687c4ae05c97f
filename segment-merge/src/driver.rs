//! Multi-phase merge driver: bounds peak column fan-in by merging inputs
//! in tiers when their column count would exceed `maxColumnsToMerge`.
//! Follows `fff-poc`'s tiered-compaction shape — a multi-pass writer that
//! re-reads its own freshly-flushed output as the next pass's input —
//! rather than any single-pass merge.

use std::path::PathBuf;

use segment_core::errors::Result;

use crate::adapter::IndexableAdapter;
use crate::aggregator::Aggregator;
use crate::assembler::{AssembleRequest, MergeResult, SegmentAssembler};
use crate::column_serializer::ComplexMetricSerdeRegistry;
use crate::descriptors::SegmentizerFactory;
use crate::medium::WriteoutMedium;
use crate::options::{DimensionsSpecInspector, MergeOptions};
use crate::progress::ProgressIndicator;
use crate::reader::SegmentReaderAdapter;

/// One `MultiPhaseDriver::merge` invocation's parameters; the same shape as
/// [`AssembleRequest`] minus the single `IndexSpec` (the driver alternates
/// between `options.intermediate_index_spec()` and `options.final_index_spec()`
/// on its own).
pub struct MultiPhaseRequest<'a> {
    pub inputs: Vec<&'a dyn IndexableAdapter>,
    pub out_dir: PathBuf,
    pub options: &'a MergeOptions,
    pub aggregator_factory: &'a dyn Fn(&str) -> Box<dyn Aggregator>,
    pub complex_registry: &'a ComplexMetricSerdeRegistry,
    pub dims_spec: Option<&'a dyn DimensionsSpecInspector>,
    pub segmentizer_factory: Option<SegmentizerFactory>,
    pub query_granularity_millis: Option<i64>,
    pub ingestion_timestamp_millis: Option<i64>,
    pub requested_metrics: Option<Vec<String>>,
    pub progress: Option<&'a mut dyn ProgressIndicator>,
}

pub struct MultiPhaseDriver;

/// An input to one tier of the merge: either one of the caller's original
/// adapters, or a segment this driver itself just committed to scratch
/// space and reopened as the next tier's input.
enum TierInput<'a> {
    Original(&'a dyn IndexableAdapter),
    Reopened(SegmentReaderAdapter),
}

impl<'a> TierInput<'a> {
    fn as_adapter(&self) -> &dyn IndexableAdapter {
        match self {
            TierInput::Original(a) => *a,
            TierInput::Reopened(a) => a,
        }
    }
}

impl MultiPhaseDriver {
    /// Partitions `request.inputs` into column-count-bounded
    /// phases, merges each phase into scratch space with the intermediate
    /// `IndexSpec`, reopens the result as the next tier's input, and repeats
    /// until a single phase remains, which is merged straight into
    /// `request.out_dir` with the final `IndexSpec`.
    pub fn merge(request: MultiPhaseRequest<'_>) -> Result<MergeResult> {
        let MultiPhaseRequest {
            inputs,
            out_dir,
            options,
            aggregator_factory,
            complex_registry,
            dims_spec,
            segmentizer_factory,
            query_granularity_millis,
            ingestion_timestamp_millis,
            requested_metrics,
            mut progress,
        } = request;

        if out_dir.exists() {
            std::fs::remove_dir_all(&out_dir)?;
        }

        let medium = WriteoutMedium::new()?;
        let mut current: Vec<TierInput<'_>> = inputs.into_iter().map(TierInput::Original).collect();
        let mut tier_number: u32 = 0;

        loop {
            let column_counts: Vec<usize> = current
                .iter()
                .map(|t| {
                    let a = t.as_adapter();
                    a.dimension_names().len() + a.metric_names().len()
                })
                .collect();
            let phases = partition_phases(&column_counts, options.max_columns_to_merge());

            if phases.len() <= 1 {
                let refs: Vec<&dyn IndexableAdapter> =
                    current.iter().map(|t| t.as_adapter()).collect();
                return SegmentAssembler::make_index_files(AssembleRequest {
                    inputs: refs,
                    out_dir,
                    options,
                    index_spec: options.final_index_spec(),
                    aggregator_factory,
                    complex_registry,
                    dims_spec,
                    segmentizer_factory,
                    query_granularity_millis,
                    ingestion_timestamp_millis,
                    requested_metrics,
                    progress: progress.as_deref_mut(),
                });
            }

            let mut next: Vec<TierInput<'_>> = Vec::with_capacity(phases.len());
            for (phase_index, members) in phases.iter().enumerate() {
                let refs: Vec<&dyn IndexableAdapter> =
                    members.iter().map(|&i| current[i].as_adapter()).collect();
                let tier_dir = medium.scratch_path(&format!("tier-{tier_number}-phase-{phase_index}"));
                SegmentAssembler::make_index_files(AssembleRequest {
                    inputs: refs,
                    out_dir: tier_dir.clone(),
                    options,
                    index_spec: options.intermediate_index_spec(),
                    aggregator_factory,
                    complex_registry,
                    dims_spec,
                    segmentizer_factory: segmentizer_factory.clone(),
                    query_granularity_millis,
                    ingestion_timestamp_millis,
                    requested_metrics: None,
                    progress: None,
                })?;
                next.push(TierInput::Reopened(SegmentReaderAdapter::open(&tier_dir)?));
            }
            current = next;
            tier_number += 1;
        }
    }
}

/// Greedily accumulates indices into phases until adding the next input's
/// own column count would push the running total past `max_columns`, then
/// starts a new phase. Afterward, any singleton phase (including one whose
/// own column count alone exceeds `max_columns`) is folded into a
/// neighboring phase, since every phase must merge at least two inputs.
fn partition_phases(column_counts: &[usize], max_columns: usize) -> Vec<Vec<usize>> {
    let mut phases: Vec<Vec<usize>> = Vec::new();
    let mut current: Vec<usize> = Vec::new();
    let mut current_total = 0usize;

    for (index, &columns) in column_counts.iter().enumerate() {
        if !current.is_empty() && current_total + columns > max_columns {
            phases.push(std::mem::take(&mut current));
            current_total = 0;
        }
        current.push(index);
        current_total += columns;
    }
    if !current.is_empty() {
        phases.push(current);
    }

    if phases.len() < 2 {
        return phases;
    }

    let mut i = 0;
    while i < phases.len() {
        if phases[i].len() == 1 {
            if i + 1 < phases.len() {
                let singleton = phases.remove(i);
                phases[i].splice(0..0, singleton);
            } else {
                let singleton = phases.remove(i);
                phases[i - 1].extend(singleton);
            }
        } else {
            i += 1;
        }
    }
    phases
}
