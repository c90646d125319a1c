//! Packing an ordered sequence of bits into bytes and back.
//!
//! The logical bit at position `8k + j` maps to the bit of byte `k` with
//! weight `2^(7-j)`, so the first bit of a group of eight becomes the
//! most significant bit of the packed byte. Both directions use the
//! 64-bit multiplication trick: eight booleans, viewed as the bytes of a
//! little-endian word, are gathered into one byte by a single multiply.

use crate::error::{Error, UnitResult, Result};
use rayon::prelude::*;

const MAGIC: u64 = 0x8040_2010_0804_0201;
const MASK: u64 = 0x8080_8080_8080_8080;

/// Pack eight booleans into one byte, first boolean into the highest bit.
#[inline]
pub fn pack_8_bits(bits: [bool; 8]) -> u8 {
    let word = u64::from_le_bytes(bits.map(|bit| bit as u8));
    (MAGIC.wrapping_mul(word) >> 56) as u8
}

/// Unpack one byte into eight booleans, highest bit first.
#[inline]
pub fn unpack_8_bits(byte: u8) -> [bool; 8] {
    let word = (MAGIC.wrapping_mul(byte as u64) & MASK) >> 7;
    word.to_le_bytes().map(|value| value != 0)
}

/// Pack a bit sequence into `dest`, starting at byte `offset`.
///
/// The bit count must be a multiple of eight and the packed bytes must fit
/// into the destination, otherwise this fails with `WrongSize`.
/// Runs in strides of 64 bits, each producing eight bytes independently.
pub fn pack_bits_into(dest: &mut [u8], offset: usize, bits: &[bool]) -> UnitResult {
    if bits.len() % 8 != 0 {
        return Err(Error::wrong_size("bit count is not a multiple of eight"));
    }
    if offset > dest.len() || dest.len() - offset < bits.len() / 8 {
        return Err(Error::wrong_size("packed bits exceed the destination buffer"));
    }

    let byte_count = bits.len() / 8;
    let stride_bytes = byte_count - byte_count % 8;

    dest[offset .. offset + stride_bytes]
        .par_chunks_exact_mut(8)
        .zip(bits.par_chunks_exact(64))
        .for_each(|(byte_stride, bit_stride)| {
            for (byte, group) in byte_stride.iter_mut().zip(bit_stride.chunks_exact(8)) {
                *byte = pack_8_bits(group.try_into().expect("chunk size is eight"));
            }
        });

    // at most seven trailing bytes
    for index in stride_bytes .. byte_count {
        let group = &bits[index * 8 .. index * 8 + 8];
        dest[offset + index] = pack_8_bits(group.try_into().expect("chunk size is eight"));
    }

    Ok(())
}

/// Unpack every byte from `offset` onwards into eight booleans each.
/// Fails with `WrongSize` when the offset lies beyond the source.
pub fn unpack_bits_from(bytes: &[u8], offset: usize) -> Result<Vec<bool>> {
    if offset > bytes.len() {
        return Err(Error::wrong_size("unpack offset lies beyond the source buffer"));
    }

    let source = &bytes[offset ..];
    let mut bits = vec![false; source.len() * 8];

    bits.par_chunks_exact_mut(64)
        .zip(source.par_chunks_exact(8))
        .for_each(|(bit_stride, byte_stride)| {
            for (group, &byte) in bit_stride.chunks_exact_mut(8).zip(byte_stride) {
                group.copy_from_slice(&unpack_8_bits(byte));
            }
        });

    let stride_bytes = source.len() - source.len() % 8;
    for index in stride_bytes .. source.len() {
        bits[index * 8 .. index * 8 + 8].copy_from_slice(&unpack_8_bits(source[index]));
    }

    Ok(bits)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn single_byte_mapping() {
        let mut bits = [false; 8];
        bits[0] = true;
        assert_eq!(pack_8_bits(bits), 0b1000_0000);

        let mut bits = [false; 8];
        bits[7] = true;
        assert_eq!(pack_8_bits(bits), 0b0000_0001);

        assert_eq!(pack_8_bits([true; 8]), 0xff);
        assert_eq!(pack_8_bits([false; 8]), 0x00);

        assert_eq!(unpack_8_bits(0b1010_0001), [true, false, true, false, false, false, false, true]);
    }

    #[test]
    fn roundtrip_all_bytes() {
        for byte in 0 ..= 255_u8 {
            assert_eq!(pack_8_bits(unpack_8_bits(byte)), byte);
        }
    }

    #[test]
    fn roundtrip_long_sequence() {
        // longer than one 64-bit stride, with a partial stride at the end
        let bits: Vec<bool> = (0 .. 8 * 173).map(|index| (index * 31 + index / 7) % 3 == 0).collect();

        let mut packed = vec![0_u8; bits.len() / 8];
        pack_bits_into(&mut packed, 0, &bits).unwrap();
        let unpacked = unpack_bits_from(&packed, 0).unwrap();

        assert_eq!(unpacked, bits);
    }

    #[test]
    fn packing_respects_offset() {
        let bits = vec![true; 16];
        let mut packed = vec![0_u8; 5];
        pack_bits_into(&mut packed, 3, &bits).unwrap();
        assert_eq!(packed, [0, 0, 0, 0xff, 0xff]);
    }

    #[test]
    fn rejects_unaligned_and_oversized() {
        let mut dest = vec![0_u8; 2];
        assert!(pack_bits_into(&mut dest, 0, &[true; 12]).is_err());
        assert!(pack_bits_into(&mut dest, 1, &[true; 16]).is_err());
        assert!(unpack_bits_from(&[1, 2, 3], 4).is_err());
    }
}
