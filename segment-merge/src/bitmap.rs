//! Bitmap index backing. Bitmap library internals stay behind a trait the
//! core only calls through an interface; `roaring` is the concrete crate
//! wired up behind that interface, the same way `xxhash-rust` is wired up
//! behind the `Checksum` trait.

use roaring::RoaringBitmap;

pub trait MutableBitmap: Send {
    fn add(&mut self, row: u32);
    fn serialized_size_bytes(&self) -> usize;
    fn to_bytes(&self) -> Vec<u8>;
}

pub trait BitmapFactory: Send + Sync {
    /// Stable identifier embedded in `index.drd`.
    fn serde_identifier(&self) -> &'static str;
    fn make_empty(&self) -> Box<dyn MutableBitmap>;
    fn union(&self, bitmaps: &[Box<dyn MutableBitmap>]) -> Box<dyn MutableBitmap>;
}

pub struct RoaringMutableBitmap(RoaringBitmap);

impl MutableBitmap for RoaringMutableBitmap {
    fn add(&mut self, row: u32) {
        self.0.insert(row);
    }

    fn serialized_size_bytes(&self) -> usize {
        self.0.serialized_size()
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.serialized_size_bytes());
        self.0
            .serialize_into(&mut buf)
            .expect("serializing an in-memory roaring bitmap cannot fail");
        buf
    }
}

/// Decodes a `roaring`-serialized bitmap back into its set row numbers.
/// Internal to this crate's own reader (multi-phase tiering, round-trip
/// tests) — not a general-purpose `BitmapSerdeFactory` reader, since bitmap
/// deserialization for arbitrary factories is the collaborator's problem.
pub fn read_roaring_rows(bytes: &[u8]) -> Vec<u32> {
    RoaringBitmap::deserialize_from(bytes)
        .expect("bitmap bytes were written by RoaringBitmapFactory in this same process")
        .iter()
        .collect()
}

pub struct RoaringBitmapFactory;

impl BitmapFactory for RoaringBitmapFactory {
    fn serde_identifier(&self) -> &'static str {
        "roaring"
    }

    fn make_empty(&self) -> Box<dyn MutableBitmap> {
        Box::new(RoaringMutableBitmap(RoaringBitmap::new()))
    }

    fn union(&self, bitmaps: &[Box<dyn MutableBitmap>]) -> Box<dyn MutableBitmap> {
        let mut out = RoaringBitmap::new();
        for b in bitmaps {
            let bytes = b.to_bytes();
            let parsed = RoaringBitmap::deserialize_from(&bytes[..])
                .expect("round-tripping a bitmap we just serialized cannot fail");
            out |= parsed;
        }
        Box::new(RoaringMutableBitmap(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_set_bits() {
        let factory = RoaringBitmapFactory;
        let mut bm = factory.make_empty();
        bm.add(1);
        bm.add(3);
        bm.add(5);
        let bytes = bm.to_bytes();
        let parsed = RoaringBitmap::deserialize_from(&bytes[..]).unwrap();
        assert_eq!(parsed.len(), 3);
        assert!(parsed.contains(1));
        assert!(parsed.contains(5));
        assert!(!parsed.contains(2));
    }

    #[test]
    fn read_roaring_rows_matches_what_was_added() {
        let factory = RoaringBitmapFactory;
        let mut bm = factory.make_empty();
        bm.add(2);
        bm.add(7);
        let rows = read_roaring_rows(&bm.to_bytes());
        assert_eq!(rows, vec![2, 7]);
    }
}
