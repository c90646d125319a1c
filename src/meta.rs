//! The self-describing stream layout: a fixed 32-byte little-endian
//! header, an optional conditioning record, and the packed bit payload,
//! which may be wrapped in a ZSTD frame.
//!
//! Byte layout of the header:
//!
//! | offset | size | content                                           |
//! |--------|------|---------------------------------------------------|
//! | 0      | 1    | low 7 bits: format major version, bit 7: ZSTD     |
//! | 1      | 12   | volume dimensions, three `u32`                    |
//! | 13     | 8    | volume mean, `f64`                                |
//! | 21     | 4    | top coefficient bitplane, `i32`                   |
//! | 25     | 4    | termination word: bit budget `u32`, or level `i32` |
//! | 29     | 1    | conditioning flags                                |
//! | 30     | 2    | reserved, zero                                    |

use crate::bits::{pack_bits_into, unpack_bits_from};
use crate::error::{Error, Result, UnitResult};
use crate::math::Vec3;
use crate::speck::Termination;
use lebe::prelude::*;
use std::io::{Read, Write};

/// Size of the fixed stream header in bytes.
pub const HEADER_SIZE: usize = 32;

/// Major version of the stream format. Streams with another major
/// version are rejected.
pub const VERSION_MAJOR: u8 = 1;

const VERSION_ZSTD_BIT: u8 = 0x80;

const FLAG_MEAN_SUBTRACTED: u8 = 0b001;
const FLAG_RMS_DIVIDED: u8 = 0b010;
const FLAG_QUANT_TERMINATION: u8 = 0b100;

/// Everything a decoder needs to know about a single-volume stream
/// besides the coded bits themselves.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Header {
    pub dims: Vec3<usize>,

    /// The mean that was subtracted before the transform.
    pub image_mean: f64,

    /// Bitplane of the largest coefficient magnitude.
    pub max_coeff_bits: i32,

    /// How the encoder terminated; decoders use this for information
    /// only and simply consume the bits that are present.
    pub termination: Termination,

    pub mean_subtracted: bool,

    /// The root mean square the coefficients were divided by, if any.
    /// Stored as an eight-byte record directly after the header.
    pub rms: Option<f64>,

    /// Whether the payload section is wrapped in a ZSTD frame.
    pub zstd_payload: bool,
}

impl Header {
    pub fn write(&self, write: &mut impl Write) -> UnitResult {
        let version = VERSION_MAJOR | if self.zstd_payload { VERSION_ZSTD_BIT } else { 0 };
        write.write_as_little_endian(&version)?;

        write.write_as_little_endian(&u32_dim(self.dims.x())?)?;
        write.write_as_little_endian(&u32_dim(self.dims.y())?)?;
        write.write_as_little_endian(&u32_dim(self.dims.z())?)?;

        write.write_as_little_endian(&self.image_mean)?;
        write.write_as_little_endian(&self.max_coeff_bits)?;

        match self.termination {
            Termination::BitBudget(budget) => {
                let budget = u32::try_from(budget)
                    .map_err(|_| Error::invalid_param("bit budget does not fit the stream header"))?;
                write.write_as_little_endian(&budget)?;
            }
            Termination::QuantLevel(level) => {
                write.write_as_little_endian(&level)?;
            }
        }

        let mut flags = 0_u8;
        if self.mean_subtracted { flags |= FLAG_MEAN_SUBTRACTED }
        if self.rms.is_some() { flags |= FLAG_RMS_DIVIDED }
        if let Termination::QuantLevel(_) = self.termination { flags |= FLAG_QUANT_TERMINATION }
        write.write_as_little_endian(&flags)?;

        write.write_all(&[0, 0])?;
        Ok(())
    }

    /// Parse the fixed header fields. The RMS record, if flagged,
    /// is read later because it may sit inside the compressed section.
    pub fn read(read: &mut impl Read) -> Result<Self> {
        let version: u8 = read.read_from_little_endian()?;
        let zstd_payload = version & VERSION_ZSTD_BIT != 0;
        if version & !VERSION_ZSTD_BIT != VERSION_MAJOR {
            return Err(Error::invalid("unsupported stream format version"));
        }

        let dim_x: u32 = read.read_from_little_endian()?;
        let dim_y: u32 = read.read_from_little_endian()?;
        let dim_z: u32 = read.read_from_little_endian()?;
        if dim_x == 0 || dim_y == 0 || dim_z == 0 {
            return Err(Error::invalid("stream contains an empty volume dimension"));
        }

        let image_mean: f64 = read.read_from_little_endian()?;
        let max_coeff_bits: i32 = read.read_from_little_endian()?;
        let termination_word: u32 = read.read_from_little_endian()?;
        let flags: u8 = read.read_from_little_endian()?;
        let mut reserved = [0_u8; 2];
        read.read_exact(&mut reserved)?;

        let termination = if flags & FLAG_QUANT_TERMINATION != 0 {
            Termination::QuantLevel(termination_word as i32)
        } else {
            Termination::BitBudget(termination_word as u64)
        };

        Ok(Header {
            dims: Vec3(dim_x as usize, dim_y as usize, dim_z as usize),
            image_mean,
            max_coeff_bits,
            termination,
            mean_subtracted: flags & FLAG_MEAN_SUBTRACTED != 0,
            rms: if flags & FLAG_RMS_DIVIDED != 0 { Some(0.0) } else { None },
            zstd_payload,
        })
    }
}

fn u32_dim(dim: usize) -> Result<u32> {
    u32::try_from(dim).map_err(|_| Error::invalid_param("volume dimension does not fit the stream header"))
}

/// Assemble a complete single-volume stream from a header and coded bits.
/// The bit count must be a whole number of bytes.
pub fn frame_stream(header: &Header, bits: &[bool]) -> Result<Vec<u8>> {
    let mut section = Vec::with_capacity(bits.len() / 8 + 8);

    if let Some(rms) = header.rms {
        section.write_as_little_endian(&rms)?;
    }

    let offset = section.len();
    section.resize(offset + bits.len() / 8, 0);
    pack_bits_into(&mut section, offset, bits)?;

    let payload = if header.zstd_payload {
        zstd::stream::encode_all(section.as_slice(), 0)
            .map_err(|_| Error::invalid("payload could not be compressed"))?
    } else {
        section
    };

    let mut stream = Vec::with_capacity(HEADER_SIZE + payload.len());
    header.write(&mut stream)?;
    debug_assert_eq!(stream.len(), HEADER_SIZE);
    stream.extend_from_slice(&payload);

    Ok(stream)
}

/// Split a single-volume stream into its header and coded bits.
pub fn parse_stream(bytes: &[u8]) -> Result<(Header, Vec<bool>)> {
    if bytes.len() < HEADER_SIZE {
        return Err(Error::invalid("stream is shorter than its header"));
    }

    let mut remaining = bytes;
    let mut header = Header::read(&mut remaining)?;

    let section;
    let payload = if header.zstd_payload {
        section = zstd::stream::decode_all(remaining)
            .map_err(|_| Error::invalid("payload is not a valid zstd frame"))?;
        section.as_slice()
    } else {
        remaining
    };

    let mut payload = payload;
    if header.rms.is_some() {
        if payload.len() < 8 {
            return Err(Error::invalid("stream is missing its conditioning record"));
        }
        header.rms = Some(payload.read_from_little_endian()?);
    }

    let bits = unpack_bits_from(payload, 0)?;
    Ok((header, bits))
}

#[cfg(test)]
mod test {
    use super::*;

    fn example_header() -> Header {
        Header {
            dims: Vec3(64, 48, 17),
            image_mean: -3.25,
            max_coeff_bits: 11,
            termination: Termination::BitBudget(123_456),
            mean_subtracted: true,
            rms: None,
            zstd_payload: false,
        }
    }

    fn example_bits() -> Vec<bool> {
        (0 .. 8 * 321).map(|index| index % 5 == 0 || index % 11 == 3).collect()
    }

    #[test]
    fn roundtrip_plain() {
        let header = example_header();
        let bits = example_bits();

        let stream = frame_stream(&header, &bits).unwrap();
        assert_eq!(stream.len(), HEADER_SIZE + bits.len() / 8);

        let (parsed, unpacked) = parse_stream(&stream).unwrap();
        assert_eq!(parsed, header);
        assert_eq!(unpacked, bits);
    }

    #[test]
    fn roundtrip_zstd_and_rms() {
        let mut header = example_header();
        header.zstd_payload = true;
        header.rms = Some(42.125);
        header.termination = Termination::QuantLevel(-6);
        let bits = example_bits();

        let stream = frame_stream(&header, &bits).unwrap();
        let (parsed, unpacked) = parse_stream(&stream).unwrap();

        assert_eq!(parsed, header);
        assert_eq!(unpacked, bits);
    }

    #[test]
    fn deterministic_bytes() {
        let header = example_header();
        let bits = example_bits();
        assert_eq!(frame_stream(&header, &bits).unwrap(), frame_stream(&header, &bits).unwrap());
    }

    #[test]
    fn rejects_foreign_streams() {
        let mut stream = frame_stream(&example_header(), &example_bits()).unwrap();
        stream[0] = 0x7f;
        assert!(parse_stream(&stream).is_err());

        assert!(parse_stream(&[0_u8; 8]).is_err());
    }
}
