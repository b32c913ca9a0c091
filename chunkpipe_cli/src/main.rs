use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::de::DeserializeOwned;

use chunkpipe_codecs::registry;
use chunkpipe_core::format::FLAG_HAS_CHECKSUM;
use chunkpipe_core::{
    ArrayMeta, ArrayReader, ArrayWriter, ByteOrder, DType, FillValue, FilterRegistry, FilterSpec,
    ReaderConfig, Region, WriterConfig,
};

mod samples;

// ── CLI definition ─────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "chunkpipe",
    about = "Pack, inspect, read, and verify filtered chunked array files",
    version
)]
struct Cli {
    /// Log more (-v debug, -vv trace); RUST_LOG overrides
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Chunk and filter a raw row-major array into a .cpa file
    Pack {
        /// Raw array bytes ("-" reads stdin)
        input: PathBuf,
        /// Destination array file
        output: PathBuf,
        /// Array shape, comma separated (e.g. 100,100,100)
        #[arg(long, value_delimiter = ',', required = true)]
        shape: Vec<u64>,
        /// Chunk shape, comma separated; defaults to the whole array
        #[arg(long, value_delimiter = ',')]
        chunks: Vec<u64>,
        /// Element type: u8 … u64, i8 … i64, f32, f64
        #[arg(long, default_value = "u8")]
        dtype: String,
        /// Byte order of the input: little | big
        #[arg(long, default_value = "little")]
        byte_order: String,
        /// Fill value for unwritten elements
        #[arg(long)]
        fill: Option<String>,
        /// Filter in encode order: NAME or ID, optional ":p1,p2,..." params,
        /// trailing "?" marks it optional (e.g. shuffle:4 --filter zstd?:9)
        #[arg(short, long = "filter")]
        filters: Vec<String>,
        /// Do not store chunks made only of the fill value
        #[arg(long)]
        skip_fill: bool,
        /// Writer settings as JSON
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Decode a region (default: the whole array) to raw bytes
    Unpack {
        /// Source array file
        input: PathBuf,
        /// Destination file ("-" writes to stdout)
        output: PathBuf,
        /// Region start, comma separated
        #[arg(long, value_delimiter = ',')]
        start: Vec<u64>,
        /// Region extent, comma separated
        #[arg(long, value_delimiter = ',')]
        count: Vec<u64>,
        /// Decode chunks on all cores
        #[arg(long)]
        parallel: bool,
        /// Reader settings as JSON
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Print array metadata and chunk index statistics
    Inspect {
        /// Array file to inspect
        file: PathBuf,
        /// Print per-chunk details
        #[arg(long)]
        chunks: bool,
    },
    /// List the registered filters
    Filters,
    /// Write the sample arrays used by `verify`
    Samples {
        /// Output directory
        dir: PathBuf,
        /// Number of lz4 frames to store (the rest stay sparse)
        #[arg(long, default_value_t = samples::LZ4_FRAMES)]
        frames: u64,
    },
    /// Read the sample arrays and check their contents
    Verify {
        /// Directory holding the sample files
        dir: PathBuf,
        /// Decode chunks on all cores
        #[arg(long)]
        parallel: bool,
    },
}

// ── Helpers ────────────────────────────────────────────────────────────────

fn human_bytes(n: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut v = n as f64;
    let mut unit = 0;
    while v >= 1024.0 && unit < UNITS.len() - 1 {
        v /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", n)
    } else {
        format!("{:.2} {}", v, UNITS[unit])
    }
}

fn throughput(bytes: usize, elapsed: Duration) -> String {
    format!("{}/s", human_bytes((bytes as f64 / elapsed.as_secs_f64()) as u64))
}

fn load_config<T: DeserializeOwned + Default>(path: Option<&Path>) -> anyhow::Result<T> {
    match path {
        None => Ok(T::default()),
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {:?}", path))?;
            serde_json::from_str(&text).with_context(|| format!("parsing config {:?}", path))
        }
    }
}

/// Parse `NAME[?][:p1,p2,...]`, where NAME is a registered filter name or a
/// numeric filter id.
fn parse_filter(arg: &str, registry: &FilterRegistry) -> anyhow::Result<FilterSpec> {
    let (head, params) = match arg.split_once(':') {
        Some((head, params)) => (head, params),
        None => (arg, ""),
    };
    let (name, optional) = match head.strip_suffix('?') {
        Some(name) => (name, true),
        None => (head, false),
    };
    let id = match name.parse::<u32>() {
        Ok(id) => id,
        Err(_) => registry
            .lookup_name(name)
            .map(|f| f.id())
            .with_context(|| format!("unknown filter '{}' (see `chunkpipe filters`)", name))?,
    };
    let params = params
        .split(',')
        .filter(|p| !p.is_empty())
        .map(|p| {
            p.trim()
                .parse::<u32>()
                .with_context(|| format!("filter '{}': bad parameter '{}'", name, p))
        })
        .collect::<anyhow::Result<Vec<u32>>>()?;
    let spec = FilterSpec::new(id, params);
    Ok(if optional { spec.optional() } else { spec })
}

fn parse_fill(text: &str, dtype: DType) -> anyhow::Result<FillValue> {
    let fill = if dtype.is_float() {
        FillValue::Float(text.parse().with_context(|| format!("bad fill value '{}'", text))?)
    } else if dtype.is_signed() {
        FillValue::Int(text.parse().with_context(|| format!("bad fill value '{}'", text))?)
    } else {
        FillValue::UInt(text.parse().with_context(|| format!("bad fill value '{}'", text))?)
    };
    Ok(fill)
}

fn read_input(input: &Path) -> anyhow::Result<Vec<u8>> {
    let mut data = Vec::new();
    if input.to_str() == Some("-") {
        io::stdin().lock().read_to_end(&mut data)?;
    } else {
        File::open(input)
            .with_context(|| format!("opening input file {:?}", input))?
            .read_to_end(&mut data)?;
    }
    Ok(data)
}

// ── Subcommand implementations ─────────────────────────────────────────────

struct PackArgs {
    input: PathBuf,
    output: PathBuf,
    shape: Vec<u64>,
    chunks: Vec<u64>,
    dtype: String,
    byte_order: String,
    fill: Option<String>,
    filters: Vec<String>,
    skip_fill: bool,
    config: Option<PathBuf>,
}

fn run_pack(args: PackArgs) -> anyhow::Result<()> {
    let registry = registry();
    let dtype = DType::parse(&args.dtype)
        .with_context(|| format!("unknown dtype '{}'", args.dtype))?;
    let byte_order = match args.byte_order.as_str() {
        "little" | "le" => ByteOrder::Little,
        "big" | "be" => ByteOrder::Big,
        other => anyhow::bail!("unknown byte order '{}'. Valid options: little, big", other),
    };
    let chunks = if args.chunks.is_empty() {
        args.shape.clone()
    } else {
        args.chunks
    };

    let mut meta = ArrayMeta::new(args.shape, chunks, dtype).with_byte_order(byte_order);
    if let Some(fill) = &args.fill {
        meta = meta.with_fill_value(parse_fill(fill, dtype)?);
    }
    for filter in &args.filters {
        meta = meta.with_filter(parse_filter(filter, registry)?);
    }
    let mut config: WriterConfig = load_config(args.config.as_deref())?;
    config.skip_fill_chunks |= args.skip_fill;

    let data = read_input(&args.input)?;
    let t0 = Instant::now();
    let mut writer = ArrayWriter::create(&args.output, meta, registry, config)
        .with_context(|| format!("creating output file {:?}", args.output))?;
    writer.write_array(&data).context("packing array")?;
    let chunk_count = writer.finish()?;
    let elapsed = t0.elapsed();

    let stored = std::fs::metadata(&args.output)?.len();
    eprintln!("  chunks      : {}", chunk_count);
    eprintln!("  raw size    : {}", human_bytes(data.len() as u64));
    eprintln!("  file size   : {}", human_bytes(stored));
    eprintln!("  ratio       : {:.2}x", data.len() as f64 / stored as f64);
    eprintln!("  throughput  : {}", throughput(data.len(), elapsed));
    eprintln!("  elapsed     : {:.3}s", elapsed.as_secs_f64());
    Ok(())
}

fn run_unpack(
    input: PathBuf,
    output: PathBuf,
    start: Vec<u64>,
    count: Vec<u64>,
    parallel: bool,
    config: Option<PathBuf>,
) -> anyhow::Result<()> {
    let mut config: ReaderConfig = load_config(config.as_deref())?;
    config.parallel |= parallel;
    let reader = ArrayReader::open(&input, registry())
        .with_context(|| format!("opening {:?}", input))?
        .with_config(config);

    let shape = reader.shape().to_vec();
    let region = match (start.is_empty(), count.is_empty()) {
        (true, true) => Region::full(&shape),
        (false, false) => Region::new(start, count),
        // Missing extent reads to the end of each dimension.
        (false, true) => {
            anyhow::ensure!(
                start.len() == shape.len(),
                "--start has {} dims, array has {}",
                start.len(),
                shape.len()
            );
            let count: Vec<u64> = shape
                .iter()
                .zip(&start)
                .map(|(s, b)| s.saturating_sub(*b))
                .collect();
            Region::new(start, count)
        }
        (true, false) => Region::new(vec![0; count.len()], count),
    };

    let t0 = Instant::now();
    let view = reader
        .read_region(&region)
        .with_context(|| format!("reading region {:?} + {:?}", region.start, region.count))?;
    let elapsed = t0.elapsed();

    if output.to_str() == Some("-") {
        io::stdout().lock().write_all(view.as_bytes())?;
    } else {
        std::fs::write(&output, view.as_bytes())
            .with_context(|| format!("writing output file {:?}", output))?;
    }

    eprintln!("  region      : {:?} + {:?}", region.start, region.count);
    eprintln!("  dtype       : {} ({:?} endian)", view.dtype(), view.byte_order());
    let raw_bytes = view.as_bytes().len();
    eprintln!("  raw size    : {}", human_bytes(raw_bytes as u64));
    eprintln!("  throughput  : {}", throughput(raw_bytes, elapsed));
    eprintln!("  elapsed     : {:.3}s", elapsed.as_secs_f64());
    Ok(())
}

fn run_inspect(file: PathBuf, show_chunks: bool) -> anyhow::Result<()> {
    let registry = registry();
    let reader = ArrayReader::open(&file, registry).with_context(|| format!("opening {:?}", file))?;
    let meta = reader.meta();
    let file_size = std::fs::metadata(&file)?.len();

    println!("=== chunkpipe array: {:?} ===", file);
    println!();
    println!("  format version : {}", reader.header().version);
    println!("  shape          : {:?}", meta.shape);
    println!("  chunk shape    : {:?}", meta.chunk_shape);
    println!("  dtype          : {} ({:?} endian)", meta.dtype, meta.byte_order);
    println!("  fill value     : {:?}", meta.fill_value);
    println!(
        "  chunks stored  : {} of {}",
        reader.stored_chunks(),
        meta.grid_shape().iter().product::<u64>()
    );
    println!("  raw size       : {}", human_bytes(reader.raw_size()));
    println!("  stored         : {}", human_bytes(reader.stored_size()));
    println!("  file on disk   : {}", human_bytes(file_size));
    println!("  ratio          : {:.2}x", reader.ratio());
    println!("  checksums      : {}", reader.header().has_flag(FLAG_HAS_CHECKSUM));
    println!("  filters        :");
    for (i, spec) in meta.filters.iter().enumerate() {
        let name = registry.lookup(spec.id).map(|f| f.name()).unwrap_or("<unregistered>");
        println!(
            "    {}. {} (id={}) params={:?}{}",
            i,
            name,
            spec.id,
            spec.params,
            if spec.optional { " optional" } else { "" }
        );
    }

    if show_chunks {
        println!();
        println!(
            "  {:>18}  {:>12}  {:>12}  {:>12}  {:>6}  {:>16}",
            "chunk", "file offset", "stored", "raw", "mask", "checksum"
        );
        println!("  {}", "-".repeat(86));
        for d in reader.chunk_descriptors() {
            println!(
                "  {:>18}  {:>12}  {:>12}  {:>12}  {:>6b}  {:016x}",
                format!("{:?}", d.coords),
                d.byte_range.start,
                human_bytes(d.stored_size),
                human_bytes(d.raw_size),
                d.filter_mask,
                d.checksum
            );
        }
    }

    Ok(())
}

fn run_filters() {
    println!("  {:>6}  {:<12}  {:>7}  {:>6}", "id", "name", "version", "encode");
    println!("  {}", "-".repeat(38));
    for info in registry().iter() {
        println!(
            "  {:>6}  {:<12}  {:>7}  {:>6}",
            info.id,
            info.name,
            info.version,
            if info.can_encode { "yes" } else { "no" }
        );
    }
}

fn run_samples(dir: PathBuf, frames: u64) -> anyhow::Result<()> {
    let t0 = Instant::now();
    for path in samples::generate(&dir, frames)? {
        let size = std::fs::metadata(&path)?.len();
        eprintln!("  {:<40} {}", path.display(), human_bytes(size));
    }
    eprintln!("  elapsed     : {:.3}s", t0.elapsed().as_secs_f64());
    Ok(())
}

fn run_verify(dir: PathBuf, parallel: bool) -> bool {
    let checks = samples::verify(&dir, ReaderConfig::default().parallel(parallel));
    for check in &checks {
        println!("{}", check);
    }
    let failed = checks.iter().filter(|c| !c.passed()).count();
    println!();
    println!("{} passed, {} failed", checks.len() - failed, failed);
    failed == 0
}

// ── Entry point ────────────────────────────────────────────────────────────

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();
}

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Pack {
            input,
            output,
            shape,
            chunks,
            dtype,
            byte_order,
            fill,
            filters,
            skip_fill,
            config,
        } => run_pack(PackArgs {
            input,
            output,
            shape,
            chunks,
            dtype,
            byte_order,
            fill,
            filters,
            skip_fill,
            config,
        })?,
        Commands::Unpack {
            input,
            output,
            start,
            count,
            parallel,
            config,
        } => run_unpack(input, output, start, count, parallel, config)?,
        Commands::Inspect { file, chunks } => run_inspect(file, chunks)?,
        Commands::Filters => run_filters(),
        Commands::Samples { dir, frames } => run_samples(dir, frames)?,
        Commands::Verify { dir, parallel } => {
            if !run_verify(dir, parallel) {
                return Ok(ExitCode::FAILURE);
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_argument_forms() {
        let reg = registry();
        assert_eq!(parse_filter("lz4", reg).unwrap(), FilterSpec::new(32004, []));
        assert_eq!(parse_filter("shuffle:4", reg).unwrap(), FilterSpec::new(2, [4]));
        assert_eq!(
            parse_filter("zstd?:9", reg).unwrap(),
            FilterSpec::new(32015, [9]).optional()
        );
        assert_eq!(
            parse_filter("32008:0,3,4,0,2", reg).unwrap(),
            FilterSpec::new(32008, [0, 3, 4, 0, 2])
        );
        assert!(parse_filter("nosuch", reg).is_err());
        assert!(parse_filter("deflate:x", reg).is_err());
    }

    #[test]
    fn fill_follows_dtype_kind() {
        assert_eq!(parse_fill("-3", DType::I16).unwrap(), FillValue::Int(-3));
        assert_eq!(parse_fill("2.5", DType::F32).unwrap(), FillValue::Float(2.5));
        assert!(parse_fill("-3", DType::U8).is_err());
    }

    #[test]
    fn writer_config_from_json_file() {
        let path = std::env::temp_dir().join("chunkpipe_cli_writer_config.json");
        std::fs::write(&path, r#"{"skip_fill_chunks": true}"#).unwrap();
        let cfg: WriterConfig = load_config(Some(&path)).unwrap();
        assert!(cfg.skip_fill_chunks);
        assert!(cfg.checksums);
        let default: ReaderConfig = load_config(None).unwrap();
        assert_eq!(default, ReaderConfig::default());
    }

    #[test]
    fn region_size_counts_bytes() {
        let path = std::env::temp_dir().join("chunkpipe_cli_region_size.cpa");
        let values: Vec<f64> = (0..1024).map(f64::from).collect();
        let meta = ArrayMeta::new([1024], [256], DType::F64);
        let mut w = ArrayWriter::create(&path, meta, registry(), WriterConfig::default()).unwrap();
        w.write_array(&chunkpipe_core::types::elements_to_bytes(&values, ByteOrder::Little))
            .unwrap();
        w.finish().unwrap();

        let view = ArrayReader::open(&path, registry())
            .unwrap()
            .read_region(&Region::new([0], [512]))
            .unwrap();
        assert_eq!(view.len(), 512);
        assert_eq!(view.as_bytes().len(), 4096);
        assert_eq!(throughput(view.as_bytes().len(), Duration::from_secs(1)), "4.00 KB/s");
        assert_eq!(throughput(1 << 20, Duration::from_millis(500)), "2.00 MB/s");
    }
}
