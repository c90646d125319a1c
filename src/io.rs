//! Reading and writing raw little-endian float volumes on disk.
//! The files carry no header; callers state the expected element count.

use crate::error::{Error, Result, UnitResult};
use lebe::prelude::*;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

/// Read a raw array of little-endian `f32` samples.
/// Fails with `WrongSize` when the file length does not
/// match the expected element count.
pub fn read_f32_volume(path: impl AsRef<Path>, expected_len: usize) -> Result<Vec<f32>> {
    let file = File::open(path)?;

    let byte_count = file.metadata()?.len();
    if byte_count != expected_len as u64 * 4 {
        return Err(Error::wrong_size("file length does not match the expected sample count"));
    }

    let mut read = BufReader::new(file);
    let mut values = vec![0.0_f32; expected_len];
    read.read_from_little_endian_into(values.as_mut_slice())?;
    Ok(values)
}

/// Write a raw array of little-endian `f32` samples.
pub fn write_f32_volume(path: impl AsRef<Path>, values: &[f32]) -> UnitResult {
    let mut write = BufWriter::new(File::create(path)?);
    write.write_as_little_endian(values)?;
    write.flush()?;
    Ok(())
}

/// Write a raw array of little-endian `f64` samples.
pub fn write_f64_volume(path: impl AsRef<Path>, values: &[f64]) -> UnitResult {
    let mut write = BufWriter::new(File::create(path)?);
    write.write_as_little_endian(values)?;
    write.flush()?;
    Ok(())
}

/// Write an arbitrary byte stream, such as a compressed volume.
pub fn write_bytes(path: impl AsRef<Path>, bytes: &[u8]) -> UnitResult {
    let mut write = BufWriter::new(File::create(path)?);
    write.write_all(bytes)?;
    write.flush()?;
    Ok(())
}

/// Read a whole file of bytes, such as a compressed volume.
pub fn read_bytes(path: impl AsRef<Path>) -> Result<Vec<u8>> {
    Ok(std::fs::read(path)?)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn roundtrip_f32_file() {
        let path = std::env::temp_dir().join("speckvol_io_roundtrip.float");
        let values: Vec<f32> = (0 .. 100).map(|index| index as f32 * 0.5 - 25.0).collect();

        write_f32_volume(&path, &values).unwrap();
        let read_back = read_f32_volume(&path, values.len()).unwrap();
        assert_eq!(read_back, values);

        assert!(read_f32_volume(&path, values.len() + 1).is_err());
        std::fs::remove_file(&path).ok();
    }
}
