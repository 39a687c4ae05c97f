//! The k-way row-merge iterator. `MergingRowIterator` is a
//! plain stable k-way merge over a `BinaryHeap`; `RowCombiningTimeAndDimsIterator`
//! wraps it with one-row lookahead to fold equal-key rows together under
//! rollup. `fff-poc` writes single streams and has no k-way merge of its
//! own, so the heap shape here follows the standard idiomatic Rust
//! k-way-merge pattern (`BinaryHeap<Reverse<_>>`) instead.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::adapter::{DimValue, MetricValue, RowPointer};
use crate::aggregator::Aggregator;

fn cmp_dims(a: &[DimValue], b: &[DimValue]) -> Ordering {
    for (x, y) in a.iter().zip(b.iter()) {
        let ord = x.values().cmp(&y.values());
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.len().cmp(&b.len())
}

fn cmp_key(a: &RowPointer, b: &RowPointer) -> Ordering {
    a.timestamp
        .cmp(&b.timestamp)
        .then_with(|| cmp_dims(&a.dims, &b.dims))
        .then_with(|| a.input_index.cmp(&b.input_index))
}

/// A `(time, dims...)` output row. `origins` is `None` for iterator
/// variants that cannot expose per-input provenance.
pub trait TimeAndDimsIterator {
    fn move_to_next(&mut self) -> bool;
    fn current_timestamp(&self) -> i64;
    fn current_dims(&self) -> &[DimValue];
    fn current_metrics(&self) -> &[MetricValue];
    /// `(input_index, min_orig_row, max_orig_row)` ranges, inclusive,
    /// touched by the row currently staged.
    fn current_origins(&self) -> Vec<(usize, usize, usize)>;

    /// Whether `current_origins` carries real per-input provenance. Both
    /// concrete iterators below are `true`; the assembler's
    /// `UnsupportedIteratorForConversion` failure
    /// fires only against a hypothetical iterator that overrides this to
    /// `false` — there is no such variant in this crate today.
    fn supports_row_conversion(&self) -> bool {
        true
    }
}

struct HeapKey(RowPointer);

impl PartialEq for HeapKey {
    fn eq(&self, other: &Self) -> bool {
        cmp_key(&self.0, &other.0) == Ordering::Equal
    }
}
impl Eq for HeapKey {}
impl PartialOrd for HeapKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for HeapKey {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; negate so popping yields the smallest key.
        cmp_key(&other.0, &self.0)
    }
}

/// k-way merge with no row combination: emits every input row, in
/// `(timestamp, dims..., input_index)` order.
pub struct MergingRowIterator<'a> {
    sources: Vec<Box<dyn Iterator<Item = RowPointer> + 'a>>,
    heap: BinaryHeap<HeapKey>,
    current: Option<RowPointer>,
}

impl<'a> MergingRowIterator<'a> {
    pub fn new(mut sources: Vec<Box<dyn Iterator<Item = RowPointer> + 'a>>) -> Self {
        let mut heap = BinaryHeap::new();
        for source in sources.iter_mut() {
            if let Some(row) = source.next() {
                heap.push(HeapKey(row));
            }
        }
        Self {
            sources,
            heap,
            current: None,
        }
    }
}

impl<'a> TimeAndDimsIterator for MergingRowIterator<'a> {
    fn move_to_next(&mut self) -> bool {
        let Some(HeapKey(row)) = self.heap.pop() else {
            self.current = None;
            return false;
        };
        if let Some(next) = self.sources[row.input_index].next() {
            self.heap.push(HeapKey(next));
        }
        self.current = Some(row);
        true
    }

    fn current_timestamp(&self) -> i64 {
        self.current.as_ref().expect("move_to_next not called").timestamp
    }

    fn current_dims(&self) -> &[DimValue] {
        &self.current.as_ref().expect("move_to_next not called").dims
    }

    fn current_metrics(&self) -> &[MetricValue] {
        &self
            .current
            .as_ref()
            .expect("move_to_next not called")
            .metrics
    }

    fn current_origins(&self) -> Vec<(usize, usize, usize)> {
        let row = self.current.as_ref().expect("move_to_next not called");
        vec![(row.input_index, row.orig_row_num, row.orig_row_num)]
    }
}

struct CombinedGroup {
    timestamp: i64,
    dims: Vec<DimValue>,
    metrics: Vec<MetricValue>,
    /// `input_index -> (min_orig_row, max_orig_row)`, insertion order
    /// preserved for deterministic iteration.
    origins: Vec<(usize, usize, usize)>,
}

/// Wraps [`MergingRowIterator`] and folds consecutive rows sharing a
/// `(time, dims...)` composite key.
pub struct RowCombiningTimeAndDimsIterator<'a> {
    inner: MergingRowIterator<'a>,
    aggregators: Vec<Box<dyn Aggregator>>,
    lookahead: Option<RowPointer>,
    inner_exhausted: bool,
    current: Option<CombinedGroup>,
}

impl<'a> RowCombiningTimeAndDimsIterator<'a> {
    pub fn new(inner: MergingRowIterator<'a>, aggregators: Vec<Box<dyn Aggregator>>) -> Self {
        Self {
            inner,
            aggregators,
            lookahead: None,
            inner_exhausted: false,
            current: None,
        }
    }

    fn pull_inner(&mut self) -> Option<RowPointer> {
        if self.inner_exhausted {
            return None;
        }
        if self.inner.move_to_next() {
            Some(RowPointer {
                timestamp: self.inner.current_timestamp(),
                dims: self.inner.current_dims().to_vec(),
                metrics: self.inner.current_metrics().to_vec(),
                input_index: self.inner.current_origins()[0].0,
                orig_row_num: self.inner.current_origins()[0].1,
            })
        } else {
            self.inner_exhausted = true;
            None
        }
    }

    /// Matches `nextCurrentlyCombinedOriginalIteratorIndex(k)`.
    pub fn nth_combined_input_index(&self, k: usize) -> Option<usize> {
        self.current.as_ref().and_then(|g| g.origins.get(k)).map(|o| o.0)
    }

    /// Matches `getMinCurrentlyCombinedRowNumByOriginalIteratorIndex(i)`.
    pub fn min_combined_row_num(&self, input_index: usize) -> Option<usize> {
        self.current
            .as_ref()
            .and_then(|g| g.origins.iter().find(|o| o.0 == input_index))
            .map(|o| o.1)
    }

    /// Matches `getMaxCurrentlyCombinedRowNumByOriginalIteratorIndex(i)`.
    pub fn max_combined_row_num(&self, input_index: usize) -> Option<usize> {
        self.current
            .as_ref()
            .and_then(|g| g.origins.iter().find(|o| o.0 == input_index))
            .map(|o| o.2)
    }

    fn same_key(a: &RowPointer, b: &RowPointer) -> bool {
        a.timestamp == b.timestamp && cmp_dims(&a.dims, &b.dims) == Ordering::Equal
    }

    fn touch_origin(origins: &mut Vec<(usize, usize, usize)>, input_index: usize, row: usize) {
        if let Some(entry) = origins.iter_mut().find(|o| o.0 == input_index) {
            entry.1 = entry.1.min(row);
            entry.2 = entry.2.max(row);
        } else {
            origins.push((input_index, row, row));
        }
    }
}

impl<'a> TimeAndDimsIterator for RowCombiningTimeAndDimsIterator<'a> {
    fn move_to_next(&mut self) -> bool {
        let first = self.lookahead.take().or_else(|| self.pull_inner());
        let Some(first) = first else {
            self.current = None;
            return false;
        };

        let mut origins = Vec::new();
        Self::touch_origin(&mut origins, first.input_index, first.orig_row_num);
        let mut metrics = first.metrics.clone();

        loop {
            match self.pull_inner() {
                Some(next) if Self::same_key(&first, &next) => {
                    Self::touch_origin(&mut origins, next.input_index, next.orig_row_num);
                    for (i, agg) in self.aggregators.iter().enumerate() {
                        metrics[i] = agg.combine(&metrics[i], &next.metrics[i]);
                    }
                }
                Some(next) => {
                    self.lookahead = Some(next);
                    break;
                }
                None => break,
            }
        }

        self.current = Some(CombinedGroup {
            timestamp: first.timestamp,
            dims: first.dims,
            metrics,
            origins,
        });
        true
    }

    fn current_timestamp(&self) -> i64 {
        self.current.as_ref().expect("move_to_next not called").timestamp
    }

    fn current_dims(&self) -> &[DimValue] {
        &self.current.as_ref().expect("move_to_next not called").dims
    }

    fn current_metrics(&self) -> &[MetricValue] {
        &self
            .current
            .as_ref()
            .expect("move_to_next not called")
            .metrics
    }

    fn current_origins(&self) -> Vec<(usize, usize, usize)> {
        self.current
            .as_ref()
            .expect("move_to_next not called")
            .origins
            .clone()
    }
}
