/// Integration tests: write chunked arrays through real filter pipelines,
/// reopen them, and read regions back.
///
/// The three sample layouts mirror the verification harness:
///  - blosc (lz4, byte shuffle) over a 100³ f64 ramp
///  - lz4 over large u16 frames, one frame per chunk, mostly sparse
///  - bitshuffle + lz4 over one large u32 frame
use std::io;
use std::ops::Range;
use std::path::PathBuf;

use chunkpipe_codecs::blosc::{BLOSC_LZ4, BLOSC_SHUFFLE};
use chunkpipe_codecs::{
    builtin_registry, registry, FILTER_BITSHUFFLE, FILTER_BLOSC, FILTER_DEFLATE, FILTER_FLETCHER32,
    FILTER_LZ4, FILTER_SHUFFLE, FILTER_ZSTD,
};
use chunkpipe_core::types::elements_to_bytes;
use chunkpipe_core::{
    ArrayMeta, ArrayReader, ArrayWriter, ByteOrder, ChunkStore, DType, Error, FillValue,
    FilterPipeline, FilterRegistry, FilterSpec, MemoryStore, ReaderConfig, Region, WriterConfig,
};

// ── helpers ───────────────────────────────────────────────────────────────

fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("chunkpipe_test_{}.cpa", name))
}

/// Generate `len` deterministic bytes using a simple LCG.
fn pseudo_random_bytes(len: usize, seed: u64) -> Vec<u8> {
    let mut rng = seed;
    (0..len)
        .map(|_| {
            rng = rng
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            (rng >> 56) as u8
        })
        .collect()
}

/// Write a whole array into an in-memory container.
fn in_memory(meta: ArrayMeta, data: &[u8], config: WriterConfig) -> Vec<u8> {
    let mut w = ArrayWriter::new(Vec::new(), meta, registry(), config).unwrap();
    w.write_array(data).unwrap();
    w.finish_into_inner().unwrap().1
}

fn open_memory(bytes: Vec<u8>) -> ArrayReader<'static, MemoryStore> {
    ArrayReader::from_store(MemoryStore::new(bytes), registry()).unwrap()
}

/// A store with a hole: any fetch overlapping `hole` fails.
struct HoleStore {
    inner: MemoryStore,
    hole: Range<u64>,
}

impl ChunkStore for HoleStore {
    fn fetch_bytes(&self, offset: u64, len: u64) -> io::Result<Vec<u8>> {
        if offset < self.hole.end && offset + len > self.hole.start {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "range not available"));
        }
        self.inner.fetch_bytes(offset, len)
    }

    fn len(&self) -> io::Result<u64> {
        self.inner.len()
    }
}

// ── sample scenarios ──────────────────────────────────────────────────────

/// 100³ f64 ramp, blosc (lz4 + byte shuffle); element (i, j, k) = 10000i + 100j + k.
#[test]
fn test_blosc_ramp_cube() {
    let n = 100u64;
    let values: Vec<f64> = (0..n * n * n).map(|v| v as f64).collect();
    let meta = ArrayMeta::new([n, n, n], [25, 50, 100], DType::F64).with_filter(FilterSpec::new(
        FILTER_BLOSC,
        [2, 2, 8, 25 * 50 * 100 * 8, 5, BLOSC_SHUFFLE, BLOSC_LZ4],
    ));
    let path = temp_path("blosc_cube");
    let mut w = ArrayWriter::create(&path, meta, registry(), WriterConfig::default()).unwrap();
    let chunks = {
        w.write_array(&elements_to_bytes(&values, ByteOrder::Little)).unwrap();
        w.finish().unwrap()
    };
    assert_eq!(chunks, 4 * 2);

    let r = ArrayReader::open(&path, registry()).unwrap();
    assert_eq!(r.get::<f64>(&[12, 34, 56]).unwrap(), 123456.0);
    assert_eq!(r.get::<f64>(&[99, 99, 99]).unwrap(), 999999.0);

    let slab = r.read_region(&Region::new([24, 49, 98], [2, 2, 2])).unwrap();
    assert_eq!(
        slab.to_vec::<f64>().unwrap(),
        vec![244998.0, 244999.0, 245098.0, 245099.0, 254998.0, 254999.0, 255098.0, 255099.0]
    );
    assert!(r.ratio() > 2.0, "ramp should compress: {:.2}x", r.ratio());
}

/// 50 frames of 2167×2070 u16, lz4, one frame per chunk. Only a few frames
/// are written; the rest read as the fill value.
#[test]
fn test_lz4_sparse_frames() {
    let (h, w_) = (2167u64, 2070u64);
    let meta = ArrayMeta::new([50, h, w_], [1, h, w_], DType::U16)
        .with_filter(FilterSpec::new(FILTER_LZ4, []));
    let path = temp_path("lz4_frames");
    let mut w = ArrayWriter::create(&path, meta, registry(), WriterConfig::default()).unwrap();
    for frame in [0u64, 21, 49] {
        let mut values: Vec<u16> = (0..h * w_)
            .map(|i| ((i / w_ * 7 + i % w_ + frame) % 1000) as u16)
            .collect();
        if frame == 21 {
            values[(1911 * w_ + 1549) as usize] = 3141;
        }
        w.write_chunk(&[frame, 0, 0], &elements_to_bytes(&values, ByteOrder::Little))
            .unwrap();
    }
    assert_eq!(w.finish().unwrap(), 3);

    let r = ArrayReader::open(&path, registry()).unwrap();
    assert_eq!(r.get::<u16>(&[21, 1911, 1549]).unwrap(), 3141);
    assert_eq!(r.get::<u16>(&[21, 1911, 1548]).unwrap(), ((1911 * 7 + 1548 + 21) % 1000) as u16);
    assert_eq!(r.get::<u16>(&[20, 1911, 1549]).unwrap(), 0);
    let descriptors = r.chunk_descriptors();
    assert_eq!(descriptors.len(), 3);
    assert_eq!(descriptors[1].offset, vec![21, 0, 0]);
    assert_eq!(descriptors[1].filters, vec![FilterSpec::new(FILTER_LZ4, [])]);
}

/// One 2167×2070 u32 frame, bitshuffle + lz4 in a single chunk.
#[test]
fn test_bitshuffle_lz4_frame() {
    let (h, w_) = (2167u64, 2070u64);
    let mut values: Vec<u32> = (0..h * w_).map(|i| (i % 4096) as u32).collect();
    values[(1372 * w_ + 613) as usize] = 922;
    let meta = ArrayMeta::new([1, h, w_], [1, h, w_], DType::U32)
        .with_filter(FilterSpec::new(FILTER_BITSHUFFLE, [0, 3, 4, 0, 2]));
    let bytes = in_memory(meta, &elements_to_bytes(&values, ByteOrder::Little), WriterConfig::default());

    let r = open_memory(bytes);
    assert_eq!(r.get::<u32>(&[0, 1372, 613]).unwrap(), 922);
    let row = r.read_region(&Region::new([0, 1372, 610], [1, 1, 5])).unwrap();
    assert_eq!(
        row.to_vec::<u32>().unwrap(),
        values[(1372 * w_ + 610) as usize..(1372 * w_ + 615) as usize]
    );
    assert!(r.stored_size() < r.raw_size());
}

// ── reader behaviour ──────────────────────────────────────────────────────

#[test]
fn test_full_read_with_edge_chunks() {
    let values: Vec<i32> = (0..10 * 7).map(|v| v * 3 - 50).collect();
    let meta = ArrayMeta::new([10, 7], [4, 3], DType::I32)
        .with_fill_value(FillValue::Int(-1))
        .with_filter(FilterSpec::new(FILTER_SHUFFLE, [4]))
        .with_filter(FilterSpec::new(FILTER_ZSTD, [3]));
    let bytes = in_memory(meta, &elements_to_bytes(&values, ByteOrder::Little), WriterConfig::default());
    let r = open_memory(bytes);

    assert_eq!(r.stored_chunks(), 3 * 3);
    assert_eq!(r.read_full().unwrap().to_vec::<i32>().unwrap(), values);

    // A region ending exactly on the array boundary.
    let corner = r.read_region(&Region::new([8, 5], [2, 2])).unwrap();
    assert_eq!(corner.to_vec::<i32>().unwrap(), vec![61 * 3 - 50, 62 * 3 - 50, 68 * 3 - 50, 69 * 3 - 50]);

    assert!(matches!(
        r.read_region(&Region::new([8, 5], [3, 2])),
        Err(Error::OutOfBounds { .. })
    ));
}

#[test]
fn test_parallel_matches_serial() {
    let data = pseudo_random_bytes(64 * 48 * 4, 0xDEAD_BEEF);
    let meta = ArrayMeta::new([64, 48], [10, 7], DType::U32)
        .with_filter(FilterSpec::new(FILTER_SHUFFLE, [4]))
        .with_filter(FilterSpec::new(FILTER_LZ4, []).optional());
    let bytes = in_memory(meta, &data, WriterConfig::default());

    let serial = open_memory(bytes.clone());
    let parallel = open_memory(bytes).with_config(ReaderConfig::default().parallel(true));
    assert_eq!(serial.read_full().unwrap(), parallel.read_full().unwrap());
    assert_eq!(parallel.read_full().unwrap().as_bytes(), &data[..]);

    let region = Region::new([5, 3], [41, 30]);
    assert_eq!(
        serial.read_region(&region).unwrap(),
        parallel.read_region(&region).unwrap()
    );
}

#[test]
fn test_skip_fill_chunks_are_sparse() {
    let mut values = vec![7u8; 32 * 32];
    values[0] = 1;
    let meta = ArrayMeta::new([32, 32], [8, 8], DType::U8)
        .with_fill_value(FillValue::UInt(7))
        .with_filter(FilterSpec::new(FILTER_ZSTD, []));
    let config = WriterConfig {
        skip_fill_chunks: true,
        ..WriterConfig::default()
    };
    let bytes = in_memory(meta, &values, config);
    let r = open_memory(bytes);
    assert_eq!(r.stored_chunks(), 1);
    assert_eq!(r.read_full().unwrap().into_bytes(), values);
}

#[test]
fn test_optional_filter_mask_is_recorded() {
    // Random bytes do not compress, so the optional zstd stage is skipped.
    let data = pseudo_random_bytes(4096, 42);
    let meta = ArrayMeta::new([4096], [4096], DType::U8)
        .with_filter(FilterSpec::new(FILTER_ZSTD, [19]).optional())
        .with_filter(FilterSpec::new(FILTER_FLETCHER32, []));
    let r = open_memory(in_memory(meta, &data, WriterConfig::default()));

    let d = &r.chunk_descriptors()[0];
    assert_eq!(d.filter_mask, 0b01);
    assert_eq!(d.filters, vec![FilterSpec::new(FILTER_FLETCHER32, [])]);
    assert_eq!(d.stored_size, 4096 + 4);
    assert_eq!(r.read_full().unwrap().into_bytes(), data);
}

// ── failure modes ─────────────────────────────────────────────────────────

#[test]
fn test_truncated_stream_is_corrupt() {
    let reg = builtin_registry();
    let pipeline = FilterPipeline::new(&reg);
    let raw: Vec<u8> = (0..20_000u32).flat_map(|v| (v / 3).to_le_bytes()).collect();
    for spec in [
        FilterSpec::new(FILTER_LZ4, []),
        FilterSpec::new(FILTER_BITSHUFFLE, [0, 3, 4, 0, 2]),
        FilterSpec::new(FILTER_BLOSC, [2, 2, 4, 0, 5, BLOSC_SHUFFLE, BLOSC_LZ4]),
        FilterSpec::new(FILTER_ZSTD, []),
    ] {
        let specs = [spec];
        let (stored, _) = pipeline.encode(&raw, &specs).unwrap();
        let err = pipeline
            .decode(&stored[..stored.len() - 7], &specs, raw.len())
            .unwrap_err();
        assert!(
            matches!(err, Error::CorruptData { .. } | Error::SizeMismatch { .. }),
            "filter {}: {err}",
            specs[0].id
        );
    }
}

#[test]
fn test_oversized_stream_is_rejected_early() {
    // Well under 1 MiB on disk, 64 MiB once expanded.
    let reg = builtin_registry();
    let pipeline = FilterPipeline::new(&reg);
    let huge = vec![0u8; 64 << 20];
    for spec in [FilterSpec::new(FILTER_ZSTD, []), FilterSpec::new(FILTER_DEFLATE, [9])] {
        let specs = [spec];
        let (stored, _) = pipeline.encode(&huge, &specs).unwrap();
        assert!(stored.len() < (1 << 20), "filter {}: {} bytes", specs[0].id, stored.len());
        match pipeline.decode(&stored, &specs, 4096) {
            Err(Error::CorruptData { filter_id, .. }) => assert_eq!(filter_id, specs[0].id),
            other => panic!("filter {}: expected CorruptData, got {other:?}", specs[0].id),
        }
    }
}

#[test]
fn test_missing_chunk_bytes() {
    let values: Vec<u16> = (0..40).collect();
    let meta = ArrayMeta::new([40], [10], DType::U16).with_filter(FilterSpec::new(FILTER_LZ4, []));
    let bytes = in_memory(meta, &elements_to_bytes(&values, ByteOrder::Little), WriterConfig::default());
    let hole = open_memory(bytes.clone()).chunk_descriptors()[2].byte_range.clone();

    let r = ArrayReader::from_store(
        HoleStore {
            inner: MemoryStore::new(bytes),
            hole,
        },
        registry(),
    )
    .unwrap();
    // Chunks 0 and 1 are still readable.
    let head = r.read_region(&Region::new([0], [20])).unwrap();
    assert_eq!(head.to_vec::<u16>().unwrap(), values[..20].to_vec());

    match r.read_region(&Region::new([15], [10])) {
        Err(Error::MissingChunk { chunk, .. }) => assert_eq!(chunk.0, vec![2]),
        other => panic!("expected MissingChunk, got {other:?}"),
    }
}

#[test]
fn test_checksum_detects_flipped_byte_on_disk() {
    let data = pseudo_random_bytes(2048, 7);
    let meta = ArrayMeta::new([2048], [512], DType::U8);
    let path = temp_path("checksum");
    let mut w = ArrayWriter::create(&path, meta, registry(), WriterConfig::default()).unwrap();
    w.write_array(&data).unwrap();
    w.finish().unwrap();

    let target = ArrayReader::open(&path, registry()).unwrap().chunk_descriptors()[3]
        .byte_range
        .start;
    let mut file = std::fs::read(&path).unwrap();
    file[target as usize + 5] ^= 0x10;
    std::fs::write(&path, &file).unwrap();

    let r = ArrayReader::open(&path, registry()).unwrap();
    assert_eq!(
        r.read_region(&Region::new([0], [1536])).unwrap().as_bytes(),
        &data[..1536]
    );
    assert!(matches!(
        r.read_full(),
        Err(Error::ChecksumMismatch { .. })
    ));
}

#[test]
fn test_unknown_filter_surfaces_at_decode() {
    // Write with a registry that knows an extra filter, read without it.
    struct Invert;
    impl chunkpipe_core::Filter for Invert {
        fn id(&self) -> u32 {
            40000
        }
        fn name(&self) -> &'static str {
            "invert"
        }
        fn decode(&self, input: &[u8], _: &[u32]) -> Result<Vec<u8>, chunkpipe_core::CodecError> {
            Ok(input.iter().map(|b| !b).collect())
        }
        fn encode(&self, input: &[u8], p: &[u32]) -> Result<Vec<u8>, chunkpipe_core::CodecError> {
            self.decode(input, p)
        }
        fn can_encode(&self) -> bool {
            true
        }
    }
    let extended: FilterRegistry = builtin_registry()
        .with(std::sync::Arc::new(Invert))
        .unwrap();

    let meta = ArrayMeta::new([16], [16], DType::U8).with_filter(FilterSpec::new(40000, []));
    let mut w = ArrayWriter::new(Vec::new(), meta, &extended, WriterConfig::default()).unwrap();
    w.write_array(&[3u8; 16]).unwrap();
    let bytes = w.finish_into_inner().unwrap().1;

    let with = ArrayReader::from_store(MemoryStore::new(bytes.clone()), &extended).unwrap();
    assert_eq!(with.read_full().unwrap().into_bytes(), vec![3u8; 16]);

    let without = open_memory(bytes);
    assert!(matches!(
        without.read_full(),
        Err(Error::UnknownFilterId { id: 40000 })
    ));
}
