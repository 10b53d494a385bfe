use std::{fmt, io::Cursor};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use bertwise_core::{
    constants::{BERT_SUB_BLOCK_SIZE, BERT_SZX, MAX_BLOCK_NUM, MAX_BLOCK_OPTION_LENGTH},
    error::{DecodingErrorKind, Result},
};

/// A Block1 or Block2 option value (RFC 7959).
///
/// Carries the zero-based block number, the "more" bit, and the size
/// exponent. `SZX = 7` is BERT (RFC 8323): the payload is a concatenation
/// of 1024-byte sub-blocks and `num` counts sub-blocks, not blocks.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct BlockOption {
    num: u32,
    m: bool,
    szx: u8,
}

impl BlockOption {
    /// Creates a block option. Panics if `szx` exceeds 7; the field is
    /// three bits wide.
    pub fn new(szx: u8, m: bool, num: u32) -> Self {
        assert!(szx <= BERT_SZX, "szx is a three-bit field");
        Self { num, m, szx }
    }

    /// Zero-based block number.
    pub fn num(&self) -> u32 {
        self.num
    }

    /// True when further blocks follow this one.
    pub fn m(&self) -> bool {
        self.m
    }

    /// Size exponent.
    pub fn szx(&self) -> u8 {
        self.szx
    }

    /// True when this option uses the BERT size exponent.
    pub fn is_bert(&self) -> bool {
        self.szx == BERT_SZX
    }

    /// Block size in bytes, or `None` for BERT where the wire defines no
    /// fixed size and the payload length determines the effective size.
    pub fn size(&self) -> Option<usize> {
        if self.is_bert() {
            None
        } else {
            Some(Self::size_of(self.szx))
        }
    }

    /// Block size in bytes for a plain size exponent (`szx <= 6`).
    pub fn size_of(szx: u8) -> usize {
        assert!(szx < BERT_SZX, "no wire-defined size for BERT");
        1 << (szx as usize + 4)
    }

    /// The unit `num` counts in: the block size for plain exponents and
    /// one sub-block (1024 bytes) for BERT.
    pub fn stride(&self) -> usize {
        if self.is_bert() {
            BERT_SUB_BLOCK_SIZE
        } else {
            Self::size_of(self.szx)
        }
    }

    /// Largest plain size exponent whose block size does not exceed `size`.
    pub fn szx_for_size(size: usize) -> u8 {
        let mut szx = 0u8;
        while szx < 6 && Self::size_of(szx + 1) <= size {
            szx += 1;
        }
        szx
    }

    /// Encodes into the 0-3 byte MSB-first wire form. The low nibble packs
    /// `m << 3 | szx`; the remaining bits carry `num`.
    pub fn encode(&self) -> Result<Vec<u8>> {
        if self.num > MAX_BLOCK_NUM {
            return Err(DecodingErrorKind::BlockNumberRange.into());
        }
        let value = (self.num << 4) | (u32::from(self.m) << 3) | u32::from(self.szx);
        if value == 0 {
            return Ok(Vec::new());
        }
        let nbytes = if value < 0x100 {
            1
        } else if value < 0x1_0000 {
            2
        } else {
            3
        };
        let mut out = Vec::with_capacity(nbytes);
        out.write_uint::<BigEndian>(u64::from(value), nbytes)
            .expect("writing to a Vec cannot fail");
        Ok(out)
    }

    /// Decodes the 0-3 byte wire form. A zero-length value decodes to
    /// `(num = 0, m = false, szx = 0)`.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() > MAX_BLOCK_OPTION_LENGTH {
            return Err(DecodingErrorKind::BlockOptionLength.into());
        }
        if bytes.is_empty() {
            return Ok(Self { num: 0, m: false, szx: 0 });
        }
        let mut cursor = Cursor::new(bytes);
        let value = cursor
            .read_uint::<BigEndian>(bytes.len())
            .expect("length checked above") as u32;
        Ok(Self { num: value >> 4, m: ((value >> 3) & 1) == 1, szx: (value & 0x7) as u8 })
    }
}

impl fmt::Debug for BlockOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(szx={}, m={}, num={})", self.szx, self.m, self.num)
    }
}

impl fmt::Display for BlockOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bertwise_core::error::ErrorKind;

    #[test]
    fn test_round_trip_all_szx_and_m() {
        // Sample the NUM space up to its 20-bit limit
        let nums = [0u32, 1, 2, 15, 16, 255, 256, 4095, 4096, 65535, 65536, (1 << 20) - 1];
        for &num in &nums {
            for szx in 0..=7u8 {
                for &m in &[false, true] {
                    let option = BlockOption::new(szx, m, num);
                    let encoded = option.encode().unwrap();
                    assert!(encoded.len() <= 3);
                    let decoded = BlockOption::decode(&encoded).unwrap();
                    assert_eq!(decoded, option, "round trip for {:?}", option);
                }
            }
        }
    }

    #[test]
    fn test_zero_value_encodes_empty() {
        let option = BlockOption::new(0, false, 0);
        assert!(option.encode().unwrap().is_empty());
        assert_eq!(BlockOption::decode(&[]).unwrap(), option);
    }

    #[test]
    fn test_minimal_length_encoding() {
        // num=0, m=true, szx=6 -> one byte 0x0e
        assert_eq!(BlockOption::new(6, true, 0).encode().unwrap(), vec![0x0e]);
        // num=16 needs a second byte
        assert_eq!(BlockOption::new(6, true, 16).encode().unwrap(), vec![0x01, 0x0e]);
        // num=4096 needs all three
        assert_eq!(BlockOption::new(7, false, 4096).encode().unwrap(), vec![0x01, 0x00, 0x07]);
    }

    #[test]
    fn test_decode_rejects_oversized_value() {
        let err = BlockOption::decode(&[0, 0, 0, 0]).unwrap_err();
        assert_eq!(err, ErrorKind::DecodingError(DecodingErrorKind::BlockOptionLength));
    }

    #[test]
    fn test_encode_rejects_oversized_num() {
        let option = BlockOption::new(0, false, 1 << 20);
        let err = option.encode().unwrap_err();
        assert_eq!(err, ErrorKind::DecodingError(DecodingErrorKind::BlockNumberRange));
    }

    #[test]
    fn test_size_table() {
        assert_eq!(BlockOption::size_of(0), 16);
        assert_eq!(BlockOption::size_of(6), 1024);
        assert_eq!(BlockOption::new(6, false, 0).size(), Some(1024));
        assert_eq!(BlockOption::new(7, false, 0).size(), None);
        assert_eq!(BlockOption::new(7, false, 0).stride(), 1024);
    }

    #[test]
    fn test_szx_for_size() {
        assert_eq!(BlockOption::szx_for_size(16), 0);
        assert_eq!(BlockOption::szx_for_size(17), 0);
        assert_eq!(BlockOption::szx_for_size(512), 5);
        assert_eq!(BlockOption::szx_for_size(1024), 6);
        assert_eq!(BlockOption::szx_for_size(4096), 6);
    }
}
