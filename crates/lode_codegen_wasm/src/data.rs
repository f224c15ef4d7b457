//! Data segment: interned string literals, each an 8-byte little-endian
//! length followed by its decoded bytes, every entry 8-byte aligned.

use crate::module::DataSegment;
use lode_syntax::unescape;
use std::collections::BTreeMap;

pub(crate) fn align8(n: u32) -> u32 {
    (n + 7) & !7
}

#[derive(Debug, Default)]
pub struct DataSection {
    segments: Vec<DataSegment>,
    interned: BTreeMap<String, u32>,
    end: u32,
}

impl DataSection {
    /// Address of the literal's length word. Literals are laid out in
    /// first-use order.
    pub fn intern(&mut self, raw: &str) -> u32 {
        if let Some(&addr) = self.interned.get(raw) {
            return addr;
        }
        let bytes = unescape(raw);
        let addr = self.end;
        self.segments.push(DataSegment {
            offset: addr,
            bytes: (bytes.len() as u64).to_le_bytes().to_vec(),
        });
        let payload = addr + 8;
        self.end = align8(payload + bytes.len() as u32);
        if !bytes.is_empty() {
            self.segments.push(DataSegment {
                offset: payload,
                bytes,
            });
        }
        self.interned.insert(raw.to_string(), addr);
        addr
    }

    /// First free byte after the data, 8-aligned.
    pub fn high_water(&self) -> u32 {
        self.end
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn into_segments(self) -> Vec<DataSegment> {
        self.segments
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literals_are_length_prefixed_and_aligned() {
        let mut data = DataSection::default();
        assert_eq!(data.intern("Hello, world!\\n"), 0);
        assert_eq!(data.intern("\\n"), 24);
        assert_eq!(data.intern("Hello, world!\\n"), 0);
        assert_eq!(data.high_water(), 40);
        let segs = data.into_segments();
        assert_eq!(segs.len(), 4);
        assert_eq!(segs[0].bytes, 14u64.to_le_bytes().to_vec());
        assert_eq!(segs[1].offset, 8);
        assert_eq!(segs[1].bytes, b"Hello, world!\n".to_vec());
        assert_eq!(segs[3].bytes, vec![b'\n']);
    }

    #[test]
    fn empty_literal_has_only_a_length() {
        let mut data = DataSection::default();
        data.intern("");
        assert_eq!(data.high_water(), 8);
        assert_eq!(data.into_segments().len(), 1);
    }
}
