//! The single-volume compression and decompression pipelines.
//!
//! Compression runs the volume through conditioning (mean subtraction and
//! optionally division by the root mean square), the forward wavelet
//! transform, and the bitplane coder, then frames the result as a
//! self-describing stream. Decompression applies the exact inverses in
//! reverse order.

use crate::error::{Error, Result, UnitResult};
use crate::math::{kahan_sum, Vec3};
use crate::meta::{self, Header};
use crate::speck::{Speck3d, Termination};
use crate::wavelet;

/// The quality target of an encoding run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RateTarget {
    /// Spend this many bits per sample, between 0 and 64.
    BitsPerSample(f32),

    /// Code every bitplane down to this quantization level.
    QuantLevel(i32),
}

/// Compresses one volume into one self-describing stream.
#[derive(Debug)]
pub struct Compressor {
    dims: Vec3<usize>,
    values: Vec<f64>,
    target: Option<RateTarget>,
    divide_rms: bool,
    zstd_payload: bool,
}

impl Compressor {
    pub fn new(dims: Vec3<usize>) -> Self {
        Compressor {
            dims,
            values: Vec::new(),
            target: None,
            divide_rms: false,
            zstd_payload: false,
        }
    }

    /// Copy single-precision samples in, widening to double precision.
    pub fn copy_data_f32(&mut self, values: &[f32]) -> UnitResult {
        if values.len() != self.dims.volume() {
            return Err(Error::wrong_size("sample count does not match the volume dimensions"));
        }
        self.values = values.iter().map(|&value| value as f64).collect();
        Ok(())
    }

    /// Take ownership of double-precision samples.
    pub fn take_data(&mut self, values: Vec<f64>) -> UnitResult {
        if values.len() != self.dims.volume() {
            return Err(Error::wrong_size("sample count does not match the volume dimensions"));
        }
        self.values = values;
        Ok(())
    }

    pub fn set_target(&mut self, target: RateTarget) -> UnitResult {
        if let RateTarget::BitsPerSample(bpp) = target {
            if !(bpp > 0.0 && bpp <= 64.0) {
                return Err(Error::invalid_param("bits per sample must lie in (0, 64]"));
            }
        }
        self.target = Some(target);
        Ok(())
    }

    /// Divide the conditioned samples by their root mean square, so
    /// chunks of very different amplitude spend their bits comparably.
    pub fn set_divide_rms(&mut self, enabled: bool) {
        self.divide_rms = enabled;
    }

    /// Wrap the coded payload in a ZSTD frame.
    pub fn set_zstd_payload(&mut self, enabled: bool) {
        self.zstd_payload = enabled;
    }

    /// Run the full pipeline and return the framed stream.
    /// Consumes the volume data; a new volume must be supplied
    /// before compressing again.
    pub fn compress(&mut self) -> Result<Vec<u8>> {
        if self.values.is_empty() {
            return Err(Error::invalid("no volume data to compress"));
        }
        let target = self.target
            .ok_or_else(|| Error::invalid("no rate or quantization target set"))?;

        let len = self.dims.volume();
        let termination = match target {
            RateTarget::BitsPerSample(bpp) => {
                let budget = (bpp as f64 * len as f64) as u64;
                Termination::BitBudget((budget + 7) / 8 * 8)
            }
            RateTarget::QuantLevel(level) => Termination::QuantLevel(level),
        };

        let mut values = std::mem::take(&mut self.values);

        let mean = kahan_sum(&values) / len as f64;
        for value in values.iter_mut() {
            *value -= mean;
        }

        let rms = if self.divide_rms {
            let rms = root_mean_square(&values);
            if rms > 0.0 {
                for value in values.iter_mut() {
                    *value /= rms;
                }
                Some(rms)
            } else {
                None
            }
        } else {
            None
        };

        wavelet::forward_3d(&mut values, self.dims);

        let mut coder = Speck3d::new(self.dims);
        coder.take_coeffs(values)?;
        coder.set_termination(termination);
        coder.encode()?;

        let header = Header {
            dims: self.dims,
            image_mean: mean,
            max_coeff_bits: coder.max_coeff_bits(),
            termination,
            mean_subtracted: true,
            rms,
            zstd_payload: self.zstd_payload,
        };

        meta::frame_stream(&header, coder.bit_buffer())
    }
}

/// Decompresses one self-describing stream back into a volume.
#[derive(Debug, Default)]
pub struct Decompressor {
    header: Option<Header>,
    bits: Vec<bool>,
    partial_bpp: Option<f32>,
}

impl Decompressor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a stream produced by a `Compressor`.
    pub fn use_stream(&mut self, bytes: &[u8]) -> UnitResult {
        let (header, bits) = meta::parse_stream(bytes)?;
        self.header = Some(header);
        self.bits = bits;
        Ok(())
    }

    /// The header of the parsed stream, if any.
    pub fn header(&self) -> Option<&Header> {
        self.header.as_ref()
    }

    /// Decode only a prefix worth this many bits per sample,
    /// trading quality for speed. Absent, everything decodes.
    pub fn set_partial_bpp(&mut self, bpp: f32) -> UnitResult {
        if !(bpp > 0.0 && bpp <= 64.0) {
            return Err(Error::invalid_param("bits per sample must lie in (0, 64]"));
        }
        self.partial_bpp = Some(bpp);
        Ok(())
    }

    /// Run the inverse pipeline and return the reconstructed samples.
    /// Consumes the parsed stream.
    pub fn decompress(&mut self) -> Result<Vec<f64>> {
        let header = self.header.take()
            .ok_or_else(|| Error::invalid("no stream to decompress"))?;

        let mut coder = Speck3d::new(header.dims);
        coder.set_max_coeff_bits(header.max_coeff_bits);
        coder.take_bits(std::mem::take(&mut self.bits));

        if let Some(bpp) = self.partial_bpp {
            let limit = (bpp as f64 * header.dims.volume() as f64) as u64;
            coder.set_decode_bit_limit(limit);
        }

        coder.decode()?;
        let mut values = coder.release_coeffs();

        wavelet::inverse_3d(&mut values, header.dims);

        if let Some(rms) = header.rms {
            for value in values.iter_mut() {
                *value *= rms;
            }
        }

        if header.mean_subtracted {
            for value in values.iter_mut() {
                *value += header.image_mean;
            }
        }

        Ok(values)
    }

    /// Like `decompress`, but narrowing to single precision.
    pub fn decompress_f32(&mut self) -> Result<Vec<f32>> {
        Ok(self.decompress()?.into_iter().map(|value| value as f32).collect())
    }
}

/// Root mean square of the conditioned samples.
fn root_mean_square(values: &[f64]) -> f64 {
    let squares: Vec<f64> = values.iter().map(|&value| value * value).collect();
    (kahan_sum(&squares) / values.len() as f64).sqrt()
}
