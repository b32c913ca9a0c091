//! Sample arrays and the checks `verify` runs against them.
//!
//! Three files are produced, one per filter family:
//!
//! | file             | shape           | dtype | pipeline                 | check                         |
//! |------------------|-----------------|-------|--------------------------|-------------------------------|
//! | `blosc.cpa`      | 100×100×100     | f64   | blosc (lz4, byte shuffle) | whole array equals a ramp     |
//! | `lz4.cpa`        | 50×2167×2070    | u16   | lz4                      | `[21, 1911, 1549] == 3141`    |
//! | `bitshuffle.cpa` | 1×2167×2070     | u32   | bitshuffle + lz4         | `[0, 1372, 613] == 922`       |

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{ensure, Context};

use chunkpipe_codecs::blosc::{BLOSC_LZ4, BLOSC_SHUFFLE};
use chunkpipe_codecs::bitshuffle::BSHUF_LZ4;
use chunkpipe_codecs::{registry, FILTER_BITSHUFFLE, FILTER_BLOSC, FILTER_LZ4};
use chunkpipe_core::types::elements_to_bytes;
use chunkpipe_core::{
    ArrayMeta, ArrayReader, ArrayWriter, ByteOrder, DType, FilterSpec, ReaderConfig, Region,
    WriterConfig,
};

pub const BLOSC_FILE: &str = "blosc.cpa";
pub const LZ4_FILE: &str = "lz4.cpa";
pub const BITSHUFFLE_FILE: &str = "bitshuffle.cpa";

const CUBE: u64 = 100;
const FRAME: [u64; 2] = [2167, 2070];
pub const LZ4_FRAMES: u64 = 50;

const LZ4_PIN: [u64; 3] = [21, 1911, 1549];
const LZ4_PIN_VALUE: u16 = 3141;
const BITSHUFFLE_PIN: [u64; 3] = [0, 1372, 613];
const BITSHUFFLE_PIN_VALUE: u32 = 922;

// ── generation ─────────────────────────────────────────────────────────────

/// Write the three sample files into `dir`.
///
/// `frames` limits how many lz4 frames are actually stored; the array keeps
/// its full shape and unwritten frames read as the fill value. The frame
/// holding the pinned value is always stored.
pub fn generate(dir: &Path, frames: u64) -> anyhow::Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir).with_context(|| format!("creating sample directory {:?}", dir))?;
    Ok(vec![
        write_blosc(&dir.join(BLOSC_FILE))?,
        write_lz4(&dir.join(LZ4_FILE), frames)?,
        write_bitshuffle(&dir.join(BITSHUFFLE_FILE))?,
    ])
}

fn write_blosc(path: &Path) -> anyhow::Result<PathBuf> {
    let elems = CUBE * CUBE * CUBE;
    let meta = ArrayMeta::new([CUBE; 3], [CUBE; 3], DType::F64).with_filter(FilterSpec::new(
        FILTER_BLOSC,
        [2, 2, 8, (elems * 8) as u32, 5, BLOSC_SHUFFLE, BLOSC_LZ4],
    ));
    let ramp: Vec<f64> = (0..elems).map(|v| v as f64).collect();

    let mut writer = ArrayWriter::create(path, meta, registry(), WriterConfig::default())
        .with_context(|| format!("creating {:?}", path))?;
    writer.write_array(&elements_to_bytes(&ramp, ByteOrder::Little))?;
    writer.finish()?;
    log::info!("wrote {:?}", path);
    Ok(path.to_path_buf())
}

/// Detector-like frame: smooth background that lz4 compresses well.
fn lz4_frame(frame: u64) -> Vec<u16> {
    let [h, w] = FRAME;
    let mut values: Vec<u16> = (0..h * w)
        .map(|i| ((i / w / 8 + i % w / 8 + frame) % 200) as u16)
        .collect();
    if frame == LZ4_PIN[0] {
        values[(LZ4_PIN[1] * w + LZ4_PIN[2]) as usize] = LZ4_PIN_VALUE;
    }
    values
}

fn write_lz4(path: &Path, frames: u64) -> anyhow::Result<PathBuf> {
    let [h, w] = FRAME;
    let meta = ArrayMeta::new([LZ4_FRAMES, h, w], [1, h, w], DType::U16)
        .with_filter(FilterSpec::new(FILTER_LZ4, []));
    let mut writer = ArrayWriter::create(path, meta, registry(), WriterConfig::default())
        .with_context(|| format!("creating {:?}", path))?;

    let mut stored: Vec<u64> = (0..frames.min(LZ4_FRAMES)).collect();
    if !stored.contains(&LZ4_PIN[0]) {
        stored.push(LZ4_PIN[0]);
    }
    for frame in stored {
        let raw = elements_to_bytes(&lz4_frame(frame), ByteOrder::Little);
        writer
            .write_chunk(&[frame, 0, 0], &raw)
            .with_context(|| format!("writing frame {frame}"))?;
        log::debug!("frame {frame} stored");
    }
    let chunks = writer.finish()?;
    log::info!("wrote {:?} ({chunks} of {LZ4_FRAMES} frames stored)", path);
    Ok(path.to_path_buf())
}

fn write_bitshuffle(path: &Path) -> anyhow::Result<PathBuf> {
    let [h, w] = FRAME;
    let mut values: Vec<u32> = (0..h * w).map(|i| ((i / w * 3 + i % w) % 1024) as u32).collect();
    values[(BITSHUFFLE_PIN[1] * w + BITSHUFFLE_PIN[2]) as usize] = BITSHUFFLE_PIN_VALUE;

    let meta = ArrayMeta::new([1, h, w], [1, h, w], DType::U32)
        .with_filter(FilterSpec::new(FILTER_BITSHUFFLE, [0, 3, 4, 0, BSHUF_LZ4]));
    let mut writer = ArrayWriter::create(path, meta, registry(), WriterConfig::default())
        .with_context(|| format!("creating {:?}", path))?;
    writer.write_array(&elements_to_bytes(&values, ByteOrder::Little))?;
    writer.finish()?;
    log::info!("wrote {:?}", path);
    Ok(path.to_path_buf())
}

// ── verification ───────────────────────────────────────────────────────────

/// Outcome of one named assertion.
pub struct Check {
    pub name: String,
    pub outcome: anyhow::Result<()>,
}

impl Check {
    fn new(name: impl Into<String>, outcome: anyhow::Result<()>) -> Self {
        Self {
            name: name.into(),
            outcome,
        }
    }

    pub fn passed(&self) -> bool {
        self.outcome.is_ok()
    }
}

impl fmt::Display for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            Ok(()) => write!(f, "PASS  {}", self.name),
            Err(e) => write!(f, "FAIL  {}: {:#}", self.name, e),
        }
    }
}

/// Run every sample check against the files in `dir`. A file that cannot be
/// opened fails its checks instead of aborting the run.
pub fn verify(dir: &Path, config: ReaderConfig) -> Vec<Check> {
    let mut checks = Vec::new();

    let blosc = open(&dir.join(BLOSC_FILE), config);
    checks.push(Check::new(
        "blosc: shape 100x100x100",
        blosc.as_ref().map_err(clone_err).and_then(|r| expect_shape(r, &[CUBE; 3])),
    ));
    checks.push(Check::new(
        "blosc: values equal arange(1e6)",
        blosc.as_ref().map_err(clone_err).and_then(check_ramp),
    ));

    let lz4 = open(&dir.join(LZ4_FILE), config);
    checks.push(Check::new(
        "lz4: shape 50x2167x2070",
        lz4.as_ref()
            .map_err(clone_err)
            .and_then(|r| expect_shape(r, &[LZ4_FRAMES, FRAME[0], FRAME[1]])),
    ));
    checks.push(Check::new(
        "lz4: [21, 1911, 1549] == 3141",
        lz4.as_ref()
            .map_err(clone_err)
            .and_then(|r| expect_value(r, &LZ4_PIN, f64::from(LZ4_PIN_VALUE))),
    ));

    let bitshuffle = open(&dir.join(BITSHUFFLE_FILE), config);
    checks.push(Check::new(
        "bitshuffle: shape 1x2167x2070",
        bitshuffle
            .as_ref()
            .map_err(clone_err)
            .and_then(|r| expect_shape(r, &[1, FRAME[0], FRAME[1]])),
    ));
    checks.push(Check::new(
        "bitshuffle: [0, 1372, 613] == 922",
        bitshuffle
            .as_ref()
            .map_err(clone_err)
            .and_then(|r| expect_value(r, &BITSHUFFLE_PIN, f64::from(BITSHUFFLE_PIN_VALUE))),
    ));

    checks
}

fn open(path: &Path, config: ReaderConfig) -> anyhow::Result<ArrayReader<'static>> {
    let reader = ArrayReader::open(path, registry()).with_context(|| format!("opening {:?}", path))?;
    Ok(reader.with_config(config))
}

fn clone_err(e: &anyhow::Error) -> anyhow::Error {
    anyhow::anyhow!("{:#}", e)
}

fn expect_shape(reader: &ArrayReader<'_>, shape: &[u64]) -> anyhow::Result<()> {
    ensure!(
        reader.shape() == shape,
        "shape is {:?}, expected {:?}",
        reader.shape(),
        shape
    );
    Ok(())
}

/// Whole-array comparison with numpy `allclose` default tolerances.
fn check_ramp(reader: &ArrayReader<'_>) -> anyhow::Result<()> {
    let values = reader.read_full()?.to_vec::<f64>()?;
    for (i, &v) in values.iter().enumerate() {
        let expected = i as f64;
        ensure!(
            (v - expected).abs() <= 1e-8 + 1e-5 * expected.abs(),
            "element {i} is {v}, expected {expected}"
        );
    }
    Ok(())
}

fn expect_value(reader: &ArrayReader<'_>, index: &[u64], expected: f64) -> anyhow::Result<()> {
    let view = reader.read_region(&Region::point(index))?;
    let at = vec![0; index.len()];
    let actual = match view.dtype() {
        DType::U8 => f64::from(view.get::<u8>(&at)?),
        DType::U16 => f64::from(view.get::<u16>(&at)?),
        DType::U32 => f64::from(view.get::<u32>(&at)?),
        DType::U64 => view.get::<u64>(&at)? as f64,
        DType::I8 => f64::from(view.get::<i8>(&at)?),
        DType::I16 => f64::from(view.get::<i16>(&at)?),
        DType::I32 => f64::from(view.get::<i32>(&at)?),
        DType::I64 => view.get::<i64>(&at)? as f64,
        DType::F32 => f64::from(view.get::<f32>(&at)?),
        DType::F64 => view.get::<f64>(&at)?,
    };
    ensure!(actual == expected, "element {:?} is {actual}, expected {expected}", index);
    Ok(())
}
