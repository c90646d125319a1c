//! Progressive lossy compression for volumetric floating-point data.
//! This library uses no foreign code or unsafe Rust.
//!
//! Volumes pass through a CDF 9/7 wavelet transform and a SPECK
//! set-partitioning bitplane coder into a self-describing stream.
//! Truncating the coded payload at any byte still decodes into a valid,
//! coarser reconstruction.

#![warn(
    rust_2018_idioms,
    future_incompatible,
    unused_extern_crates,
    unused,

    missing_copy_implementations,
    missing_debug_implementations,
)]

#![deny(
    unused_variables,
    unused_assignments,
    unused_must_use,
    trivial_numeric_casts,
    redundant_semicolons
)]

#![forbid(unsafe_code)]

pub mod error;
pub mod math;
pub mod bits;
pub mod wavelet;
pub mod speck;
pub mod meta;
pub mod compress;
pub mod chunks;
pub mod stats;
pub mod io;

/// Export the most important items from `speckvol`.
/// _Note: This includes a type called `Result`, possibly overwriting the default `std::Result` type usage._
pub mod prelude {
    pub use crate::compress::{Compressor, Decompressor, RateTarget};
    pub use crate::chunks::{compress_chunked, decompress_chunked, ChunkOptions, DEFAULT_CHUNK_DIMS};
    pub use crate::meta::Header;
    pub use crate::speck::{Speck3d, Termination};
    pub use crate::stats::{error_stats, ErrorStats};

    // common math
    pub use crate::math::Vec3;

    // error handling
    pub use crate::error::{Error, Result, UnitResult};
}
