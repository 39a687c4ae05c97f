//! Per-file data checksum, used to detect silent corruption of a committed
//! container. Follows `common::checksum`'s shape: a small trait plus a
//! factory function keyed on a `#[repr(u8)]` enum.

use xxhash_rust::xxh64::Xxh64;

#[repr(u8)]
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum ChecksumType {
    XxHash,
}

impl From<u8> for ChecksumType {
    fn from(v: u8) -> ChecksumType {
        match v {
            0 => ChecksumType::XxHash,
            other => panic!("invalid checksum type byte: {other}"),
        }
    }
}

impl From<ChecksumType> for u8 {
    fn from(t: ChecksumType) -> u8 {
        match t {
            ChecksumType::XxHash => 0,
        }
    }
}

pub trait Checksum {
    fn update(&mut self, data: &[u8]);
    fn finalize(&self) -> u64;
}

#[derive(Default)]
pub struct XxHash {
    state: Xxh64,
}

impl Checksum for XxHash {
    fn update(&mut self, data: &[u8]) {
        self.state.update(data);
    }

    fn finalize(&self) -> u64 {
        self.state.digest()
    }
}

pub fn create_checksum(checksum_type: ChecksumType) -> Box<dyn Checksum> {
    match checksum_type {
        ChecksumType::XxHash => Box::new(XxHash::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_independent_chunking_same_bytes() {
        let mut a = create_checksum(ChecksumType::XxHash);
        a.update(b"hello");
        a.update(b"world");

        let mut b = create_checksum(ChecksumType::XxHash);
        b.update(b"helloworld");

        assert_eq!(a.finalize(), b.finalize());
    }

    #[test]
    fn byte_order_matters() {
        let mut a = create_checksum(ChecksumType::XxHash);
        a.update(b"ab");
        let mut b = create_checksum(ChecksumType::XxHash);
        b.update(b"ba");
        assert_ne!(a.finalize(), b.finalize());
    }
}
