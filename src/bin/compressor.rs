//! Command line front-end for compressing raw float volumes.

use clap::Parser;
use speckvol::prelude::*;
use speckvol::{chunks, io, stats};

#[derive(Parser)]
#[command(name = "compressor")]
#[command(version, about = "Compress a raw float32 volume into a progressive stream")]
struct Args {
    /// Input file: raw little-endian float32 samples, X varying fastest
    input: std::path::PathBuf,

    /// Output file for the compressed stream
    output: std::path::PathBuf,

    /// Volume dimensions
    #[arg(long, num_args = 3, value_names = ["X", "Y", "Z"], required = true)]
    dims: Vec<usize>,

    /// Preferred chunk dimensions
    #[arg(long, num_args = 3, value_names = ["X", "Y", "Z"], default_values_t = [64_usize, 64, 64])]
    chunks: Vec<usize>,

    /// Bits to spend per sample, between 0 and 64
    #[arg(long, conflicts_with = "qz")]
    bpp: Option<f32>,

    /// Quantization level of the last coded bitplane
    #[arg(long, allow_hyphen_values = true)]
    qz: Option<i32>,

    /// Divide each chunk by its root mean square before coding
    #[arg(long)]
    div_rms: bool,

    /// Wrap each chunk payload in a ZSTD frame
    #[arg(long)]
    zstd: bool,

    /// Number of worker threads, 0 for one per core
    #[arg(long, default_value_t = 0)]
    threads: usize,

    /// Decompress again after compressing and report error statistics
    #[arg(long)]
    stats: bool,
}

fn main() {
    let args = Args::parse();
    if let Err(error) = run(&args) {
        eprintln!("error: {}", error);
        std::process::exit(1);
    }
}

fn run(args: &Args) -> speckvol::error::UnitResult {
    if args.threads > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(args.threads)
            .build_global()
            .map_err(|_| Error::invalid("the thread pool was already initialized"))?;
    }

    let dims = Vec3(args.dims[0], args.dims[1], args.dims[2]);
    let chunk_dims = Vec3(args.chunks[0], args.chunks[1], args.chunks[2]);

    let target = match (args.bpp, args.qz) {
        (Some(bpp), None) => RateTarget::BitsPerSample(bpp),
        (None, Some(level)) => RateTarget::QuantLevel(level),
        _ => return Err(Error::invalid_param("exactly one of --bpp and --qz must be given")),
    };

    let samples = io::read_f32_volume(&args.input, dims.volume())?;
    let values: Vec<f64> = samples.iter().map(|&sample| sample as f64).collect();

    let mut options = ChunkOptions::new(target);
    options.chunk_dims = chunk_dims;
    options.divide_rms = args.div_rms;
    options.zstd_payload = args.zstd;

    let container = compress_chunked(&values, dims, &options)?;
    io::write_bytes(&args.output, &container)?;

    println!(
        "compressed {} samples into {} bytes ({:.3} bits per sample)",
        values.len(),
        container.len(),
        container.len() as f64 * 8.0 / values.len() as f64,
    );

    if args.stats {
        let (decoded, _) = chunks::decompress_chunked(&container)?;
        let report = stats::error_stats(&values, &decoded);
        println!(
            "rmse {:.6e}  max error {:.6e}  psnr {:.2} dB",
            report.rmse, report.linfty, report.psnr,
        );
    }

    Ok(())
}
