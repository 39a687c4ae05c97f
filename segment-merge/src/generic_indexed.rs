//! `GenericIndexed<string>`: a generic, random-access serialization of a
//! sequence of byte strings — element count, version byte, then a monotone
//! offsets table, all big-endian via `byteorder`. Follows the
//! length-prefixed table encoders in `fff-poc::encoder::container`,
//! generalized from fixed-width records to variable-length strings.

use std::io::{Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use segment_core::errors::{Error, Result};

const VERSION: u8 = 1;

/// Encodes a sequence of strings as `[count: u32][version: u8][offsets:
/// (count+1) x u64][bytes: concatenated utf-8]`. Offsets are into the
/// concatenated byte region, so element `i` spans `[offsets[i],
/// offsets[i+1])`.
pub fn write_generic_indexed(sink: &mut dyn Write, values: &[String]) -> Result<()> {
    sink.write_u32::<BigEndian>(values.len() as u32)?;
    sink.write_u8(VERSION)?;

    let mut offset = 0u64;
    let mut offsets = Vec::with_capacity(values.len() + 1);
    offsets.push(offset);
    for v in values {
        offset += v.len() as u64;
        offsets.push(offset);
    }
    for o in &offsets {
        sink.write_u64::<BigEndian>(*o)?;
    }
    for v in values {
        sink.write_all(v.as_bytes())?;
    }
    Ok(())
}

pub fn read_generic_indexed(source: &mut dyn Read) -> Result<Vec<String>> {
    let count = source.read_u32::<BigEndian>()? as usize;
    let version = source.read_u8()?;
    if version != VERSION {
        return Err(Error::ContainerIo(format!(
            "unsupported GenericIndexed version byte: {version}"
        )));
    }

    let mut offsets = Vec::with_capacity(count + 1);
    for _ in 0..=count {
        offsets.push(source.read_u64::<BigEndian>()?);
    }

    let total_bytes = *offsets.last().unwrap_or(&0) as usize;
    let mut buf = vec![0u8; total_bytes];
    source.read_exact(&mut buf)?;

    let mut values = Vec::with_capacity(count);
    for i in 0..count {
        let start = offsets[i] as usize;
        let end = offsets[i + 1] as usize;
        let s = String::from_utf8(buf[start..end].to_vec())
            .map_err(|e| Error::ContainerIo(format!("GenericIndexed element is not utf-8: {e}")))?;
        values.push(s);
    }
    Ok(values)
}

/// Byte size `write_generic_indexed` would produce, used by serializers to
/// report `serialized_size` without materializing the bytes.
pub fn generic_indexed_size(values: &[String]) -> usize {
    4 + 1 + (values.len() + 1) * 8 + values.iter().map(|v| v.len()).sum::<usize>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_arbitrary_strings() {
        let values = vec!["".to_string(), "a".to_string(), "hello world".to_string()];
        let mut buf = Vec::new();
        write_generic_indexed(&mut buf, &values).unwrap();
        assert_eq!(buf.len(), generic_indexed_size(&values));
        let back = read_generic_indexed(&mut &buf[..]).unwrap();
        assert_eq!(back, values);
    }

    #[test]
    fn empty_sequence_round_trips() {
        let values: Vec<String> = vec![];
        let mut buf = Vec::new();
        write_generic_indexed(&mut buf, &values).unwrap();
        let back = read_generic_indexed(&mut &buf[..]).unwrap();
        assert!(back.is_empty());
    }

    #[test]
    fn rejects_unknown_version_byte() {
        let mut buf = Vec::new();
        buf.write_u32::<BigEndian>(0).unwrap();
        buf.write_u8(9).unwrap();
        let err = read_generic_indexed(&mut &buf[..]).unwrap_err();
        assert!(matches!(err, Error::ContainerIo(_)));
    }
}
