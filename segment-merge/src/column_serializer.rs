//! Per-column serializers: `open` once, `serialize(..)` once per merged row
//! in emission order, then `writeTo(..)` when flushing. Follows the
//! `ColumnWriter` trait shape in `fff-poc::encoder` (`open`/`write`/`finish`
//! lifecycle over a sink), here specialized to numeric legacy/V2 and
//! registry-dispatched complex forms.

use std::collections::HashMap;
use std::io::{Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use segment_core::errors::{Error, Result};

use crate::adapter::MetricValue;
use crate::bitmap::{read_roaring_rows, BitmapFactory, MutableBitmap};

/// Global null-handling mode selecting the numeric column encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NullHandling {
    /// No null bitmap; null values are coerced to zero.
    Legacy,
    /// Explicit null `roaring` bitmap co-serialized with the values.
    V2,
}

pub trait ColumnSerializer {
    fn open(&mut self) -> Result<()>;
    fn serialize(&mut self, value: &MetricValue) -> Result<()>;
    fn serialized_size(&self) -> usize;
    fn write_to(&self, sink: &mut dyn Write) -> Result<()>;
}

enum Numeric {
    Long(Vec<i64>),
    Float(Vec<f32>),
    Double(Vec<f64>),
}

impl Numeric {
    fn push(&mut self, value: &MetricValue) -> Result<bool> {
        Ok(match (self, value) {
            (Numeric::Long(v), MetricValue::Long(x)) => {
                v.push(*x);
                false
            }
            (Numeric::Long(v), MetricValue::Null) => {
                v.push(0);
                true
            }
            (Numeric::Float(v), MetricValue::Float(x)) => {
                v.push(*x);
                false
            }
            (Numeric::Float(v), MetricValue::Null) => {
                v.push(0.0);
                true
            }
            (Numeric::Double(v), MetricValue::Double(x)) => {
                v.push(*x);
                false
            }
            (Numeric::Double(v), MetricValue::Null) => {
                v.push(0.0);
                true
            }
            (_, other) => {
                return Err(Error::InvalidInput(format!(
                    "numeric serializer received a value of the wrong kind: {:?}",
                    other
                )))
            }
        })
    }

    fn len(&self) -> usize {
        match self {
            Numeric::Long(v) => v.len(),
            Numeric::Float(v) => v.len(),
            Numeric::Double(v) => v.len(),
        }
    }

    fn write_values(&self, sink: &mut dyn Write) -> Result<()> {
        match self {
            Numeric::Long(v) => {
                for x in v {
                    sink.write_i64::<BigEndian>(*x)?;
                }
            }
            Numeric::Float(v) => {
                for x in v {
                    sink.write_f32::<BigEndian>(*x)?;
                }
            }
            Numeric::Double(v) => {
                for x in v {
                    sink.write_f64::<BigEndian>(*x)?;
                }
            }
        }
        Ok(())
    }

    fn byte_width(&self) -> usize {
        match self {
            Numeric::Long(_) => 8,
            Numeric::Float(_) => 4,
            Numeric::Double(_) => 8,
        }
    }
}

/// LONG/FLOAT/DOUBLE column serializer, switched between legacy and V2 form
/// by `NullHandling`. The time column (`__time`) is just a `Numeric::Long`
/// instance of this same serializer under the `__time` name.
pub struct NumericColumnSerializer<'a> {
    values: Numeric,
    null_handling: NullHandling,
    null_rows: Vec<u32>,
    row_index: u32,
    bitmap_factory: Option<&'a dyn BitmapFactory>,
    opened: bool,
}

impl<'a> NumericColumnSerializer<'a> {
    fn new(values: Numeric, null_handling: NullHandling, bitmap_factory: Option<&'a dyn BitmapFactory>) -> Self {
        Self {
            values,
            null_handling,
            null_rows: Vec::new(),
            row_index: 0,
            bitmap_factory,
            opened: false,
        }
    }

    pub fn long(null_handling: NullHandling, bitmap_factory: Option<&'a dyn BitmapFactory>) -> Self {
        Self::new(Numeric::Long(Vec::new()), null_handling, bitmap_factory)
    }

    pub fn float(null_handling: NullHandling, bitmap_factory: Option<&'a dyn BitmapFactory>) -> Self {
        Self::new(Numeric::Float(Vec::new()), null_handling, bitmap_factory)
    }

    pub fn double(null_handling: NullHandling, bitmap_factory: Option<&'a dyn BitmapFactory>) -> Self {
        Self::new(Numeric::Double(Vec::new()), null_handling, bitmap_factory)
    }

    fn null_bitmap_bytes(&self) -> Vec<u8> {
        let factory = self
            .bitmap_factory
            .expect("V2 numeric serializer requires a bitmap factory");
        let mut bm = factory.make_empty();
        for &row in &self.null_rows {
            bm.add(row);
        }
        bm.to_bytes()
    }
}

impl<'a> ColumnSerializer for NumericColumnSerializer<'a> {
    fn open(&mut self) -> Result<()> {
        if self.null_handling == NullHandling::V2 && self.bitmap_factory.is_none() {
            return Err(Error::InvalidInput(
                "V2 numeric serializer opened without a bitmap factory".to_string(),
            ));
        }
        self.opened = true;
        Ok(())
    }

    fn serialize(&mut self, value: &MetricValue) -> Result<()> {
        if !self.opened {
            return Err(Error::InvalidInput("serialize called before open".to_string()));
        }
        let was_null = self.values.push(value)?;
        if was_null && self.null_handling == NullHandling::V2 {
            self.null_rows.push(self.row_index);
        }
        self.row_index += 1;
        Ok(())
    }

    fn serialized_size(&self) -> usize {
        let values = self.values.len() * self.values.byte_width();
        match self.null_handling {
            NullHandling::Legacy => values,
            NullHandling::V2 => values + 4 + self.null_bitmap_bytes().len(),
        }
    }

    fn write_to(&self, sink: &mut dyn Write) -> Result<()> {
        if self.null_handling == NullHandling::V2 {
            let bitmap = self.null_bitmap_bytes();
            sink.write_u32::<BigEndian>(bitmap.len() as u32)?;
            sink.write_all(&bitmap)?;
        }
        self.values.write_values(sink)?;
        Ok(())
    }
}

/// Which numeric family a column blob holds, needed to read one back
/// without the static typing `Numeric` gives the write side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumericKind {
    Long,
    Float,
    Double,
}

/// Inverse of [`NumericColumnSerializer::write_to`]: decodes `row_count`
/// values of `kind`, honoring the same legacy/V2 null layout.
pub fn read_numeric_column(
    source: &mut dyn Read,
    kind: NumericKind,
    row_count: usize,
    null_handling: NullHandling,
) -> Result<Vec<MetricValue>> {
    let null_rows: Vec<u32> = if null_handling == NullHandling::V2 {
        let len = source.read_u32::<BigEndian>()? as usize;
        let mut bitmap_bytes = vec![0u8; len];
        source.read_exact(&mut bitmap_bytes)?;
        read_roaring_rows(&bitmap_bytes)
    } else {
        Vec::new()
    };

    let mut values = Vec::with_capacity(row_count);
    for row in 0..row_count {
        let is_null = null_rows.contains(&(row as u32));
        let value = match kind {
            NumericKind::Long => {
                let raw = source.read_i64::<BigEndian>()?;
                if is_null {
                    MetricValue::Null
                } else {
                    MetricValue::Long(raw)
                }
            }
            NumericKind::Float => {
                let raw = source.read_f32::<BigEndian>()?;
                if is_null {
                    MetricValue::Null
                } else {
                    MetricValue::Float(raw)
                }
            }
            NumericKind::Double => {
                let raw = source.read_f64::<BigEndian>()?;
                if is_null {
                    MetricValue::Null
                } else {
                    MetricValue::Double(raw)
                }
            }
        };
        values.push(value);
    }
    Ok(values)
}

/// Combines two already-serialized complex values of the same type and
/// knows how to turn the combined representation into bytes. Registered
/// under a type name in a [`ComplexMetricSerdeRegistry`].
pub trait ComplexMetricSerde: Send + Sync {
    fn type_name(&self) -> &'static str;
    fn combine(&self, a: &serde_json::Value, b: &serde_json::Value) -> serde_json::Value;
    fn serialize(&self, value: &serde_json::Value) -> Result<Vec<u8>>;
}

/// Demo complex type: a running `(count, sum)` merge summary, standing in
/// for a cardinality-sketch-style complex metric without pulling in a
/// full sketch library as a dependency.
pub struct SketchSummarySerde;

impl ComplexMetricSerde for SketchSummarySerde {
    fn type_name(&self) -> &'static str {
        "sketchSummary"
    }

    fn combine(&self, a: &serde_json::Value, b: &serde_json::Value) -> serde_json::Value {
        let (ca, sa) = parse_sketch(a);
        let (cb, sb) = parse_sketch(b);
        serde_json::json!({ "count": ca + cb, "sum": sa + sb })
    }

    fn serialize(&self, value: &serde_json::Value) -> Result<Vec<u8>> {
        let (count, sum) = parse_sketch(value);
        let mut buf = Vec::with_capacity(16);
        buf.write_u64::<BigEndian>(count)?;
        buf.write_f64::<BigEndian>(sum)?;
        Ok(buf)
    }
}

fn parse_sketch(value: &serde_json::Value) -> (u64, f64) {
    let count = value.get("count").and_then(|v| v.as_u64()).unwrap_or(0);
    let sum = value.get("sum").and_then(|v| v.as_f64()).unwrap_or(0.0);
    (count, sum)
}

/// Type-name-keyed dispatch table for complex metrics. Looking
/// up an unregistered type name is the crate's sole `UnknownComplexType`
/// failure path.
pub struct ComplexMetricSerdeRegistry {
    serdes: HashMap<&'static str, Box<dyn ComplexMetricSerde>>,
}

impl ComplexMetricSerdeRegistry {
    pub fn with_defaults() -> Self {
        let mut registry = Self {
            serdes: HashMap::new(),
        };
        registry.register(Box::new(SketchSummarySerde));
        registry
    }

    pub fn register(&mut self, serde: Box<dyn ComplexMetricSerde>) {
        self.serdes.insert(serde.type_name(), serde);
    }

    pub fn get(&self, type_name: &str) -> Result<&dyn ComplexMetricSerde> {
        self.serdes
            .get(type_name)
            .map(|b| b.as_ref())
            .ok_or_else(|| Error::UnknownComplexType(type_name.to_string()))
    }
}

/// Complex-column serializer: accumulates already-combined values and
/// delegates byte encoding to the registered [`ComplexMetricSerde`].
pub struct ComplexColumnSerializer<'a> {
    type_name: String,
    serde: &'a dyn ComplexMetricSerde,
    values: Vec<serde_json::Value>,
    opened: bool,
}

impl<'a> ComplexColumnSerializer<'a> {
    pub fn new(type_name: impl Into<String>, serde: &'a dyn ComplexMetricSerde) -> Self {
        Self {
            type_name: type_name.into(),
            serde,
            values: Vec::new(),
            opened: false,
        }
    }
}

impl<'a> ColumnSerializer for ComplexColumnSerializer<'a> {
    fn open(&mut self) -> Result<()> {
        self.opened = true;
        Ok(())
    }

    fn serialize(&mut self, value: &MetricValue) -> Result<()> {
        if !self.opened {
            return Err(Error::InvalidInput("serialize called before open".to_string()));
        }
        match value {
            MetricValue::Complex(v) => self.values.push(v.clone()),
            MetricValue::Null => self.values.push(serde_json::Value::Null),
            other => {
                return Err(Error::InvalidInput(format!(
                    "complex column `{}` received a non-complex value: {:?}",
                    self.type_name, other
                )))
            }
        }
        Ok(())
    }

    fn serialized_size(&self) -> usize {
        self.values
            .iter()
            .map(|v| self.serde.serialize(v).map(|b| b.len()).unwrap_or(0))
            .sum()
    }

    fn write_to(&self, sink: &mut dyn Write) -> Result<()> {
        for value in &self.values {
            let bytes = self.serde.serialize(value)?;
            sink.write_all(&bytes)?;
        }
        Ok(())
    }
}
