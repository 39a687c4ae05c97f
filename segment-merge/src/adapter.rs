//! Input-side collaborator interfaces: the adapter contract a caller
//! implements over its own sorted rows, plus the column-reordering wrapper
//! that projects an adapter's native column order into the unified merge
//! schema. Mirrors `fff-poc::encoder::logical`'s per-field encoder tree —
//! one cursor per logical column, driven in lock-step — but on the read
//! side of a merge rather than the write side.

use crate::capability::ColumnCapabilities;

pub const INVALID_ROW: i64 = -1;

/// A single dimension value: absent, single-valued, or multi-valued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DimValue {
    Null,
    Single(String),
    Multi(Vec<String>),
}

impl DimValue {
    pub fn is_null(&self) -> bool {
        matches!(self, DimValue::Null)
    }

    /// Iterates the individual string values this row contributes, in order.
    pub fn values(&self) -> Vec<&str> {
        match self {
            DimValue::Null => vec![],
            DimValue::Single(s) => vec![s.as_str()],
            DimValue::Multi(vs) => vs.iter().map(|s| s.as_str()).collect(),
        }
    }
}

/// A single metric value. `Complex` carries a JSON payload the registered
/// `ComplexMetricSerde` knows how to combine and serialize.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricValue {
    Null,
    Long(i64),
    Float(f32),
    Double(f64),
    Complex(serde_json::Value),
}

/// A row as produced by an input adapter, already projected into the
/// unified schema's column order (nil-filled for columns the input lacks).
#[derive(Debug, Clone)]
pub struct AdapterRow {
    pub timestamp: i64,
    pub dims: Vec<DimValue>,
    pub metrics: Vec<MetricValue>,
}

/// A cursor into a single input, identifying the current row.
#[derive(Debug, Clone)]
pub struct RowPointer {
    pub timestamp: i64,
    pub dims: Vec<DimValue>,
    pub metrics: Vec<MetricValue>,
    pub input_index: usize,
    pub orig_row_num: usize,
}

/// The read-only interface an ingestion source or a previously-built
/// segment must expose to participate in a merge.
pub trait IndexableAdapter {
    /// Inclusive-exclusive `[start, end)` interval in epoch millis.
    fn interval(&self) -> (i64, i64);
    fn dimension_names(&self) -> &[String];
    fn metric_names(&self) -> &[String];
    fn capabilities(&self, column: &str) -> Option<ColumnCapabilities>;
    fn metric_complex_type_name(&self, metric: &str) -> Option<String>;
    fn num_rows(&self) -> usize;
    /// Rows in non-decreasing `(timestamp, dims...)` key order, already in
    /// this adapter's own (not yet unified) column order.
    fn rows(&self) -> Box<dyn Iterator<Item = AdapterRow> + '_>;
}

/// Projects an input's own column order into the unified schema's order,
/// filling missing dimensions/metrics with nulls. Built once per input
/// before the row walk starts.
pub struct ColumnReorderWrapper<'a> {
    inner: Box<dyn Iterator<Item = AdapterRow> + 'a>,
    input_index: usize,
    /// For each unified dimension position, the input's local index, or
    /// `None` if the input does not have this dimension.
    dim_permutation: Vec<Option<usize>>,
    metric_permutation: Vec<Option<usize>>,
    next_row_num: usize,
}

impl<'a> ColumnReorderWrapper<'a> {
    pub fn new(
        adapter: &'a dyn IndexableAdapter,
        input_index: usize,
        unified_dims: &[String],
        unified_metrics: &[String],
    ) -> Self {
        let local_dims = adapter.dimension_names();
        let local_metrics = adapter.metric_names();
        let dim_permutation = unified_dims
            .iter()
            .map(|d| local_dims.iter().position(|x| x == d))
            .collect();
        let metric_permutation = unified_metrics
            .iter()
            .map(|m| local_metrics.iter().position(|x| x == m))
            .collect();
        Self {
            inner: adapter.rows(),
            input_index,
            dim_permutation,
            metric_permutation,
            next_row_num: 0,
        }
    }
}

impl<'a> Iterator for ColumnReorderWrapper<'a> {
    type Item = RowPointer;

    fn next(&mut self) -> Option<RowPointer> {
        let row = self.inner.next()?;
        let dims = self
            .dim_permutation
            .iter()
            .map(|local| match local {
                Some(i) => row.dims.get(*i).cloned().unwrap_or(DimValue::Null),
                None => DimValue::Null,
            })
            .collect();
        let metrics = self
            .metric_permutation
            .iter()
            .map(|local| match local {
                Some(i) => row.metrics.get(*i).cloned().unwrap_or(MetricValue::Null),
                None => MetricValue::Null,
            })
            .collect();
        let orig_row_num = self.next_row_num;
        self.next_row_num += 1;
        Some(RowPointer {
            timestamp: row.timestamp,
            dims,
            metrics,
            input_index: self.input_index,
            orig_row_num,
        })
    }
}
