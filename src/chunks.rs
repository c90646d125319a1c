//! Compressing large volumes as a grid of independent chunks.
//!
//! Each chunk is a complete single-volume stream of its own, so chunks
//! compress and decompress in parallel without any shared state. The
//! container prefixes the concatenated streams with the chunk grid and an
//! offset table, so any chunk can be located without parsing the others.
//!
//! Container layout, all little-endian: the magic bytes `SVCH`, a format
//! version byte, a flags byte, two reserved bytes, the volume dimensions
//! (three `u32`), the chunk counts per dimension (three `u32`), one
//! `(offset: u64, size: u64)` table entry per chunk in z-major chunk
//! order, then the chunk streams. Offsets are relative to the end of
//! the table.

use crate::compress::{Compressor, Decompressor, RateTarget};
use crate::error::{Error, Result};
use crate::math::Vec3;
use lebe::prelude::*;
use rayon::prelude::*;

/// The default preferred chunk size.
pub const DEFAULT_CHUNK_DIMS: Vec3<usize> = Vec3(64, 64, 64);

const CONTAINER_MAGIC: [u8; 4] = *b"SVCH";
const CONTAINER_VERSION: u8 = 1;

/// How a chunked volume is compressed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChunkOptions {
    /// Preferred chunk size; boundary chunks may be smaller.
    pub chunk_dims: Vec3<usize>,

    /// Quality target, applied to every chunk independently.
    pub target: RateTarget,

    /// Divide each chunk by its own root mean square before coding.
    pub divide_rms: bool,

    /// Wrap each chunk payload in a ZSTD frame.
    pub zstd_payload: bool,
}

impl ChunkOptions {
    pub fn new(target: RateTarget) -> Self {
        ChunkOptions {
            chunk_dims: DEFAULT_CHUNK_DIMS,
            target,
            divide_rms: false,
            zstd_payload: false,
        }
    }
}

/// Whether a byte stream starts with the chunked container magic,
/// as opposed to a bare single-volume stream.
pub fn is_chunked_container(bytes: &[u8]) -> bool {
    bytes.len() >= CONTAINER_MAGIC.len() && bytes[.. CONTAINER_MAGIC.len()] == CONTAINER_MAGIC
}

/// Cut a length into segments of near-equal size.
/// The segment count is the preferred chunk count rounded to nearest,
/// so boundary chunks never degenerate into thin slivers.
fn segment_count(len: usize, preferred: usize) -> usize {
    assert!(len > 0 && preferred > 0);
    ((len + preferred / 2) / preferred).max(1)
}

/// The segment lengths for a fixed segment count,
/// longer segments first, differing by at most one.
fn segment_lengths(len: usize, count: usize) -> Vec<usize> {
    let base = len / count;
    let remainder = len % count;
    (0 .. count)
        .map(|index| if index < remainder { base + 1 } else { base })
        .collect()
}

/// The chunk grid for a volume: per-dimension chunk counts
/// and the origin and size of every chunk in z-major order.
fn chunk_grid(dims: Vec3<usize>, counts: Vec3<usize>) -> Vec<(Vec3<usize>, Vec3<usize>)> {
    let lengths_x = segment_lengths(dims.x(), counts.x());
    let lengths_y = segment_lengths(dims.y(), counts.y());
    let lengths_z = segment_lengths(dims.z(), counts.z());

    let offsets = |lengths: &[usize]| -> Vec<usize> {
        lengths.iter()
            .scan(0, |offset, &length| {
                let start = *offset;
                *offset += length;
                Some(start)
            })
            .collect()
    };

    let offsets_x = offsets(&lengths_x);
    let offsets_y = offsets(&lengths_y);
    let offsets_z = offsets(&lengths_z);

    let mut boxes = Vec::with_capacity(counts.volume());
    for z in 0 .. counts.z() {
        for y in 0 .. counts.y() {
            for x in 0 .. counts.x() {
                boxes.push((
                    Vec3(offsets_x[x], offsets_y[y], offsets_z[z]),
                    Vec3(lengths_x[x], lengths_y[y], lengths_z[z]),
                ));
            }
        }
    }

    boxes
}

fn extract_chunk(values: &[f64], dims: Vec3<usize>, origin: Vec3<usize>, size: Vec3<usize>) -> Vec<f64> {
    let mut chunk = Vec::with_capacity(size.volume());
    for z in 0 .. size.z() {
        for y in 0 .. size.y() {
            let row = Vec3(origin.x(), origin.y() + y, origin.z() + z).flat_index_for_size(dims);
            chunk.extend_from_slice(&values[row .. row + size.x()]);
        }
    }
    chunk
}

fn scatter_chunk(values: &mut [f64], dims: Vec3<usize>, origin: Vec3<usize>, size: Vec3<usize>, chunk: &[f64]) {
    for z in 0 .. size.z() {
        for y in 0 .. size.y() {
            let row = Vec3(origin.x(), origin.y() + y, origin.z() + z).flat_index_for_size(dims);
            let chunk_row = (z * size.y() + y) * size.x();
            values[row .. row + size.x()].copy_from_slice(&chunk[chunk_row .. chunk_row + size.x()]);
        }
    }
}

/// Compress a volume chunk by chunk, in parallel, into one container.
pub fn compress_chunked(values: &[f64], dims: Vec3<usize>, options: &ChunkOptions) -> Result<Vec<u8>> {
    if values.len() != dims.volume() || values.is_empty() {
        return Err(Error::wrong_size("sample count does not match the volume dimensions"));
    }
    if options.chunk_dims.volume() == 0 {
        return Err(Error::invalid_param("chunk dimensions must not be zero"));
    }

    let counts = Vec3(
        segment_count(dims.x(), options.chunk_dims.x()),
        segment_count(dims.y(), options.chunk_dims.y()),
        segment_count(dims.z(), options.chunk_dims.z()),
    );
    let grid = chunk_grid(dims, counts);

    let streams = grid
        .par_iter()
        .map(|&(origin, size)| {
            let mut compressor = Compressor::new(size);
            compressor.take_data(extract_chunk(values, dims, origin, size))?;
            compressor.set_target(options.target)?;
            compressor.set_divide_rms(options.divide_rms);
            compressor.set_zstd_payload(options.zstd_payload);
            compressor.compress()
        })
        .collect::<Result<Vec<_>>>()?;

    let table_entries = streams.len();
    let payload_size: usize = streams.iter().map(|stream| stream.len()).sum();
    let mut container = Vec::with_capacity(4 + 4 + 24 + table_entries * 16 + payload_size);

    container.extend_from_slice(&CONTAINER_MAGIC);
    container.write_as_little_endian(&CONTAINER_VERSION)?;
    container.write_as_little_endian(&0_u8)?;
    container.extend_from_slice(&[0, 0]);

    for &dim in &[dims.x(), dims.y(), dims.z(), counts.x(), counts.y(), counts.z()] {
        let dim = u32::try_from(dim)
            .map_err(|_| Error::invalid_param("volume dimension does not fit the container header"))?;
        container.write_as_little_endian(&dim)?;
    }

    let mut offset = 0_u64;
    for stream in &streams {
        container.write_as_little_endian(&offset)?;
        container.write_as_little_endian(&(stream.len() as u64))?;
        offset += stream.len() as u64;
    }

    for stream in &streams {
        container.extend_from_slice(stream);
    }

    Ok(container)
}

/// Decompress a chunked container, in parallel,
/// back into one volume and its dimensions.
pub fn decompress_chunked(bytes: &[u8]) -> Result<(Vec<f64>, Vec3<usize>)> {
    decompress_chunked_partial(bytes, None)
}

/// Like `decompress_chunked`, but decoding only a prefix worth
/// `partial_bpp` bits per sample of every chunk.
pub fn decompress_chunked_partial(bytes: &[u8], partial_bpp: Option<f32>) -> Result<(Vec<f64>, Vec3<usize>)> {
    let mut read = bytes;

    let mut magic = [0_u8; 4];
    std::io::Read::read_exact(&mut read, &mut magic)?;
    if magic != CONTAINER_MAGIC {
        return Err(Error::invalid("not a chunked volume container"));
    }

    let version: u8 = read.read_from_little_endian()?;
    if version != CONTAINER_VERSION {
        return Err(Error::invalid("unsupported container version"));
    }
    let _flags: u8 = read.read_from_little_endian()?;
    let mut reserved = [0_u8; 2];
    std::io::Read::read_exact(&mut read, &mut reserved)?;

    let mut fields = [0_usize; 6];
    for field in fields.iter_mut() {
        let value: u32 = read.read_from_little_endian()?;
        *field = value as usize;
    }
    let dims = Vec3(fields[0], fields[1], fields[2]);
    let counts = Vec3(fields[3], fields[4], fields[5]);

    if dims.volume() == 0 || counts.volume() == 0
        || counts.x() > dims.x() || counts.y() > dims.y() || counts.z() > dims.z() {
        return Err(Error::invalid("container describes an impossible chunk grid"));
    }

    let grid = chunk_grid(dims, counts);
    let mut table = Vec::with_capacity(grid.len());
    for _ in 0 .. grid.len() {
        let offset: u64 = read.read_from_little_endian()?;
        let size: u64 = read.read_from_little_endian()?;
        table.push((offset as usize, size as usize));
    }

    let payload = read;
    for &(offset, size) in &table {
        let end = offset.checked_add(size);
        if end.map_or(true, |end| end > payload.len()) {
            return Err(Error::invalid("chunk table points outside the container"));
        }
    }

    let chunks = grid
        .par_iter()
        .zip(table.par_iter())
        .map(|(&(origin, size), &(stream_offset, stream_size))| {
            let mut decompressor = Decompressor::new();
            decompressor.use_stream(&payload[stream_offset .. stream_offset + stream_size])?;
            if let Some(bpp) = partial_bpp {
                decompressor.set_partial_bpp(bpp)?;
            }

            let header_dims = decompressor.header()
                .map(|header| header.dims)
                .unwrap_or(Vec3(0, 0, 0));
            if header_dims != size {
                return Err(Error::invalid("chunk stream dimensions contradict the container grid"));
            }

            Ok((origin, size, decompressor.decompress()?))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut values = vec![0.0; dims.volume()];
    for (origin, size, chunk) in chunks {
        scatter_chunk(&mut values, dims, origin, size, &chunk);
    }

    Ok((values, dims))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn segments_avoid_slivers() {
        assert_eq!(segment_count(65, 64), 1);
        assert_eq!(segment_count(97, 64), 2);
        assert_eq!(segment_count(128, 64), 2);
        assert_eq!(segment_count(30, 64), 1);

        assert_eq!(segment_lengths(65, 1), vec![65]);
        assert_eq!(segment_lengths(97, 2), vec![49, 48]);
        assert_eq!(segment_lengths(130, 2), vec![65, 65]);
    }

    #[test]
    fn grid_covers_the_volume() {
        let dims = Vec3(70, 40, 33);
        let grid = chunk_grid(dims, Vec3(2, 1, 2));

        let total: usize = grid.iter().map(|&(_, size)| size.volume()).sum();
        assert_eq!(total, dims.volume());

        let (last_origin, last_size) = grid[grid.len() - 1];
        assert_eq!(last_origin.x() + last_size.x(), dims.x());
        assert_eq!(last_origin.y() + last_size.y(), dims.y());
        assert_eq!(last_origin.z() + last_size.z(), dims.z());
    }

    #[test]
    fn extract_scatter_roundtrip() {
        let dims = Vec3(6, 5, 4);
        let values: Vec<f64> = (0 .. dims.volume()).map(|index| index as f64).collect();

        let origin = Vec3(2, 1, 1);
        let size = Vec3(3, 3, 2);
        let chunk = extract_chunk(&values, dims, origin, size);
        assert_eq!(chunk.len(), size.volume());
        assert_eq!(chunk[0], Vec3(2, 1, 1).flat_index_for_size(dims) as f64);

        let mut target = vec![0.0; dims.volume()];
        scatter_chunk(&mut target, dims, origin, size, &chunk);
        assert_eq!(target[Vec3(4, 3, 2).flat_index_for_size(dims)],
                   values[Vec3(4, 3, 2).flat_index_for_size(dims)]);
    }
}
