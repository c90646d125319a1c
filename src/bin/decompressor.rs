//! Command line front-end for decompressing volume streams.

use clap::Parser;
use speckvol::prelude::*;
use speckvol::{chunks, io};

#[derive(Parser)]
#[command(name = "decompressor")]
#[command(version, about = "Decompress a volume stream back into raw float samples")]
struct Args {
    /// Input file: a compressed volume stream or chunked container
    input: std::path::PathBuf,

    /// Output file for the raw samples
    output: std::path::PathBuf,

    /// Write float64 samples instead of float32
    #[arg(long)]
    f64: bool,

    /// Decode only a prefix worth this many bits per sample
    #[arg(long)]
    bpp: Option<f32>,

    /// Number of worker threads, 0 for one per core
    #[arg(long, default_value_t = 0)]
    threads: usize,
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

    let bytes = io::read_bytes(&args.input)?;

    let (values, dims) = if chunks::is_chunked_container(&bytes) {
        chunks::decompress_chunked_partial(&bytes, args.bpp)?
    } else {
        let mut decompressor = Decompressor::new();
        decompressor.use_stream(&bytes)?;
        if let Some(bpp) = args.bpp {
            decompressor.set_partial_bpp(bpp)?;
        }
        let dims = decompressor.header()
            .map(|header| header.dims)
            .ok_or_else(|| Error::invalid("stream carries no header"))?;
        (decompressor.decompress()?, dims)
    };

    if args.f64 {
        io::write_f64_volume(&args.output, &values)?;
    } else {
        let narrowed: Vec<f32> = values.iter().map(|&value| value as f32).collect();
        io::write_f32_volume(&args.output, &narrowed)?;
    }

    println!(
        "decompressed a {} x {} x {} volume ({} samples)",
        dims.x(), dims.y(), dims.z(), values.len(),
    );

    Ok(())
}
