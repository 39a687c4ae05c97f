//! Dimension dictionary/value-stream/bitmap-index merger, implemented as a
//! three-phase protocol: dictionary → values (+ conversions, built by the
//! assembler's row walk) → index build. No back-pointer from merger to row
//! iterator is needed — the assembler hands the merger whatever it needs
//! at each phase boundary.

use std::collections::BTreeMap;
use std::io::{Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use segment_core::errors::Result;

use crate::adapter::{DimValue, IndexableAdapter, INVALID_ROW};
use crate::bitmap::BitmapFactory;
use crate::capability::{ColumnCapabilities, TriState};
use crate::descriptors::ColumnDescriptor;
use crate::generic_indexed::{read_generic_indexed, write_generic_indexed};

/// Per-dimension merge driver. One instance per output dimension.
pub struct DictionaryDimensionMerger {
    name: String,
    /// Sorted (lexicographic), null excluded — null rows encode to no ids.
    dictionary: Vec<String>,
    value_to_id: BTreeMap<String, u32>,
    multi_valued: bool,
    has_nulls: bool,
    /// One entry per input, one entry per that input's row (in the order
    /// `rows()` enumerates them), holding the dictionary ids that row's
    /// dimension value(s) encode to.
    per_input_row_ids: Vec<Vec<Vec<u32>>>,
    /// Encoded values for each *output* row, filled by `process_merged_row`.
    encoded_rows: Vec<Vec<u32>>,
    bitmaps: Option<Vec<Vec<u8>>>,
    capabilities: Option<ColumnCapabilities>,
}

impl DictionaryDimensionMerger {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dictionary: Vec::new(),
            value_to_id: BTreeMap::new(),
            multi_valued: false,
            has_nulls: false,
            per_input_row_ids: Vec::new(),
            encoded_rows: Vec::new(),
            bitmaps: None,
            capabilities: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Phase 1: unions and sorts every input's distinct values for this
    /// dimension. Must be called before any row is processed. Inputs are
    /// scanned through their own, independently reopened row cursor — the
    /// assembler's merge-order row walk uses a separate cursor per input.
    pub fn write_merged_value_dictionary(
        &mut self,
        inputs: &[&dyn IndexableAdapter],
        capabilities: ColumnCapabilities,
    ) -> Result<()> {
        self.multi_valued = capabilities.has_multiple_values == TriState::True;
        self.capabilities = Some(capabilities);

        let mut distinct: std::collections::BTreeSet<String> = std::collections::BTreeSet::new();
        let mut per_input_local_values: Vec<Vec<Vec<String>>> = Vec::with_capacity(inputs.len());

        for adapter in inputs {
            let local_index = adapter
                .dimension_names()
                .iter()
                .position(|d| d == &self.name);
            let mut rows_values = Vec::new();
            if let Some(idx) = local_index {
                for row in adapter.rows() {
                    let dim = row.dims.get(idx).cloned().unwrap_or(DimValue::Null);
                    if dim.is_null() {
                        self.has_nulls = true;
                    }
                    let values: Vec<String> = dim.values().into_iter().map(String::from).collect();
                    for v in &values {
                        distinct.insert(v.clone());
                    }
                    rows_values.push(values);
                }
            } else {
                self.has_nulls = true;
                for _ in 0..adapter.num_rows() {
                    rows_values.push(Vec::new());
                }
            }
            per_input_local_values.push(rows_values);
        }

        self.dictionary = distinct.into_iter().collect();
        self.value_to_id = self
            .dictionary
            .iter()
            .enumerate()
            .map(|(i, v)| (v.clone(), i as u32))
            .collect();

        self.per_input_row_ids = per_input_local_values
            .into_iter()
            .map(|rows| {
                rows.into_iter()
                    .map(|values| {
                        values
                            .iter()
                            .map(|v| self.value_to_id[v])
                            .collect::<Vec<u32>>()
                    })
                    .collect()
            })
            .collect();

        log::debug!(
            "dimension `{}`: merged dictionary has {} distinct values across {} inputs",
            self.name,
            self.dictionary.len(),
            inputs.len()
        );
        Ok(())
    }

    /// Phase 2: called once per output row in key order.
    pub fn process_merged_row(&mut self, value: &DimValue) -> Result<()> {
        let ids = value
            .values()
            .into_iter()
            .map(|v| *self.value_to_id.get(v).expect("value absent from merged dictionary"))
            .collect();
        self.encoded_rows.push(ids);
        Ok(())
    }

    /// Phase 3: builds the inverted bitmap index by mapping each input's
    /// per-row dictionary ids through that input's row-number conversion
    /// buffer.
    pub fn write_indexes(
        &mut self,
        conversions: &[Vec<i64>],
        bitmap_factory: &dyn BitmapFactory,
    ) -> Result<()> {
        let mut builders: Vec<Box<dyn crate::bitmap::MutableBitmap>> = (0..self.dictionary.len())
            .map(|_| bitmap_factory.make_empty())
            .collect();

        for (input_idx, rows) in self.per_input_row_ids.iter().enumerate() {
            let conv = conversions.get(input_idx);
            for (row_num, ids) in rows.iter().enumerate() {
                let out = match conv.and_then(|c| c.get(row_num)) {
                    Some(&out) if out != INVALID_ROW => out,
                    _ => continue,
                };
                for &id in ids {
                    builders[id as usize].add(out as u32);
                }
            }
        }

        self.bitmaps = Some(builders.iter().map(|b| b.to_bytes()).collect());
        Ok(())
    }

    /// True iff the merged dictionary is empty (no non-null value ever
    /// appeared, including via rows that never referenced one).
    pub fn has_only_nulls(&self) -> bool {
        self.dictionary.is_empty()
    }

    pub fn make_column_descriptor(&self) -> ColumnDescriptor {
        let has_bitmap_index = self
            .capabilities
            .as_ref()
            .map(|c| c.has_bitmap_indexes)
            .unwrap_or(false)
            && self.bitmaps.is_some();
        ColumnDescriptor::Dimension {
            name: self.name.clone(),
            row_count: self.encoded_rows.len() as u64,
            cardinality: self.dictionary.len() as u64,
            has_multiple_values: self.multi_valued,
            has_bitmap_index,
        }
    }

    pub fn dictionary(&self) -> &[String] {
        &self.dictionary
    }

    pub fn encoded_rows(&self) -> &[Vec<u32>] {
        &self.encoded_rows
    }

    pub fn bitmaps(&self) -> Option<&[Vec<u8>]> {
        self.bitmaps.as_deref()
    }

    /// The dimension's column blob payload: merged dictionary,
    /// then the per-row encoded value stream (preserving within-row order
    /// for multi-valued rows), then the bitmap index section. Read back by
    /// [`read_dimension_payload`].
    pub fn write_payload(&self, sink: &mut dyn Write) -> Result<()> {
        write_generic_indexed(sink, &self.dictionary)?;
        sink.write_u32::<BigEndian>(self.encoded_rows.len() as u32)?;
        for ids in &self.encoded_rows {
            sink.write_u8(ids.len() as u8)?;
            for id in ids {
                sink.write_u32::<BigEndian>(*id)?;
            }
        }
        match &self.bitmaps {
            Some(bitmaps) => {
                sink.write_u32::<BigEndian>(bitmaps.len() as u32)?;
                for bitmap in bitmaps {
                    sink.write_u32::<BigEndian>(bitmap.len() as u32)?;
                    sink.write_all(bitmap)?;
                }
            }
            None => sink.write_u32::<BigEndian>(0)?,
        }
        Ok(())
    }
}

/// A dimension column blob decoded back out of a committed segment
/// (multi-phase driver tiering, round-trip tests).
pub struct DecodedDimensionColumn {
    pub dictionary: Vec<String>,
    pub encoded_rows: Vec<Vec<u32>>,
    pub bitmaps: Vec<Vec<u8>>,
}

pub fn read_dimension_payload(source: &mut dyn Read) -> Result<DecodedDimensionColumn> {
    let dictionary = read_generic_indexed(source)?;
    let row_count = source.read_u32::<BigEndian>()? as usize;
    let mut encoded_rows = Vec::with_capacity(row_count);
    for _ in 0..row_count {
        let count = source.read_u8()? as usize;
        let mut ids = Vec::with_capacity(count);
        for _ in 0..count {
            ids.push(source.read_u32::<BigEndian>()?);
        }
        encoded_rows.push(ids);
    }
    let bitmap_count = source.read_u32::<BigEndian>()? as usize;
    let mut bitmaps = Vec::with_capacity(bitmap_count);
    for _ in 0..bitmap_count {
        let len = source.read_u32::<BigEndian>()? as usize;
        let mut buf = vec![0u8; len];
        source.read_exact(&mut buf)?;
        bitmaps.push(buf);
    }
    Ok(DecodedDimensionColumn {
        dictionary,
        encoded_rows,
        bitmaps,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::AdapterRow;
    use crate::bitmap::RoaringBitmapFactory;
    use crate::capability::ValueType;
    use roaring::RoaringBitmap;

    struct OneColAdapter {
        dims: Vec<String>,
        rows: Vec<AdapterRow>,
    }

    impl IndexableAdapter for OneColAdapter {
        fn interval(&self) -> (i64, i64) {
            (0, 100)
        }
        fn dimension_names(&self) -> &[String] {
            &self.dims
        }
        fn metric_names(&self) -> &[String] {
            &[]
        }
        fn capabilities(&self, _column: &str) -> Option<ColumnCapabilities> {
            None
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

    #[test]
    fn dictionary_values_equal_output_row_count_and_bitmaps_match() {
        let a0 = OneColAdapter {
            dims: vec!["a".to_string()],
            rows: vec![
                AdapterRow {
                    timestamp: 10,
                    dims: vec![DimValue::Single("x".to_string())],
                    metrics: vec![],
                },
                AdapterRow {
                    timestamp: 20,
                    dims: vec![DimValue::Single("y".to_string())],
                    metrics: vec![],
                },
            ],
        };
        let mut merger = DictionaryDimensionMerger::new("a");
        let caps = ColumnCapabilities::dimension(ValueType::String);
        merger
            .write_merged_value_dictionary(&[&a0 as &dyn IndexableAdapter], caps)
            .unwrap();
        assert_eq!(merger.dictionary(), &["x".to_string(), "y".to_string()]);

        merger
            .process_merged_row(&DimValue::Single("x".to_string()))
            .unwrap();
        merger
            .process_merged_row(&DimValue::Single("y".to_string()))
            .unwrap();
        assert_eq!(merger.encoded_rows().len(), 2);

        let conversions = vec![vec![0i64, 1i64]];
        merger
            .write_indexes(&conversions, &RoaringBitmapFactory)
            .unwrap();
        let bitmaps = merger.bitmaps().unwrap();
        let x_bitmap = RoaringBitmap::deserialize_from(&bitmaps[0][..]).unwrap();
        assert!(x_bitmap.contains(0));
        assert!(!x_bitmap.contains(1));
    }

    #[test]
    fn all_null_dimension_has_only_nulls() {
        let a0 = OneColAdapter {
            dims: vec!["z".to_string()],
            rows: vec![AdapterRow {
                timestamp: 10,
                dims: vec![DimValue::Null],
                metrics: vec![],
            }],
        };
        let mut merger = DictionaryDimensionMerger::new("z");
        merger
            .write_merged_value_dictionary(
                &[&a0 as &dyn IndexableAdapter],
                ColumnCapabilities::dimension(ValueType::String),
            )
            .unwrap();
        assert!(merger.has_only_nulls());
    }

    #[test]
    fn payload_round_trips_dictionary_rows_and_bitmaps() {
        let a0 = OneColAdapter {
            dims: vec!["a".to_string()],
            rows: vec![AdapterRow {
                timestamp: 10,
                dims: vec![DimValue::Multi(vec!["x".to_string(), "y".to_string()])],
                metrics: vec![],
            }],
        };
        let mut caps = ColumnCapabilities::dimension(ValueType::String);
        caps.has_multiple_values = TriState::True;
        let mut merger = DictionaryDimensionMerger::new("a");
        merger
            .write_merged_value_dictionary(&[&a0 as &dyn IndexableAdapter], caps)
            .unwrap();
        merger
            .process_merged_row(&DimValue::Multi(vec!["x".to_string(), "y".to_string()]))
            .unwrap();
        merger
            .write_indexes(&[vec![0i64]], &RoaringBitmapFactory)
            .unwrap();

        let mut buf = Vec::new();
        merger.write_payload(&mut buf).unwrap();
        let decoded = read_dimension_payload(&mut &buf[..]).unwrap();
        assert_eq!(decoded.dictionary, vec!["x".to_string(), "y".to_string()]);
        assert_eq!(decoded.encoded_rows, vec![vec![0u32, 1u32]]);
        assert_eq!(decoded.bitmaps.len(), 2);
    }
}
