//! Property tests: every bundled filter undoes its own encoding, and no
//! decoder panics on arbitrary bytes.

use chunkpipe_codecs::blosc::{BLOSC_BITSHUFFLE, BLOSC_LZ4, BLOSC_SHUFFLE, BLOSC_ZSTD};
use chunkpipe_codecs::{
    builtin_registry, FILTER_BITSHUFFLE, FILTER_BLOSC, FILTER_DEFLATE, FILTER_FLETCHER32,
    FILTER_LZ4, FILTER_SHUFFLE, FILTER_ZSTD,
};
use chunkpipe_core::{FilterPipeline, FilterSpec};
use proptest::prelude::*;

/// Structured-looking data: small integers of the given width, the kind the
/// shuffle filters are meant for.
fn typed_bytes(elem_size: usize) -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(0u64..1000, 0..600).prop_map(move |values| {
        values
            .iter()
            .flat_map(|v| v.to_le_bytes()[..elem_size].to_vec())
            .collect()
    })
}

fn pipelines() -> Vec<Vec<FilterSpec>> {
    vec![
        vec![FilterSpec::new(FILTER_DEFLATE, [6])],
        vec![FilterSpec::new(FILTER_ZSTD, [3])],
        vec![FilterSpec::new(FILTER_LZ4, [256])],
        vec![FilterSpec::new(FILTER_FLETCHER32, [])],
        vec![
            FilterSpec::new(FILTER_SHUFFLE, [4]),
            FilterSpec::new(FILTER_LZ4, []),
            FilterSpec::new(FILTER_FLETCHER32, []),
        ],
        vec![FilterSpec::new(FILTER_BITSHUFFLE, [0, 3, 4, 0, 0])],
        vec![FilterSpec::new(FILTER_BITSHUFFLE, [0, 3, 4, 16, 2])],
        vec![FilterSpec::new(FILTER_BITSHUFFLE, [0, 3, 4, 0, 3, 1])],
        vec![FilterSpec::new(FILTER_BLOSC, [2, 2, 4, 0, 5, BLOSC_SHUFFLE, BLOSC_LZ4])],
        vec![FilterSpec::new(FILTER_BLOSC, [2, 2, 4, 0, 9, BLOSC_BITSHUFFLE, BLOSC_ZSTD])],
    ]
}

proptest! {
    #[test]
    fn pipelines_round_trip(data in typed_bytes(4)) {
        let reg = builtin_registry();
        let pipeline = FilterPipeline::new(&reg);
        for specs in pipelines() {
            let (stored, mask) = pipeline.encode(&data, &specs).unwrap();
            prop_assert_eq!(mask, 0);
            let decoded = pipeline.decode(&stored, &specs, data.len()).unwrap();
            prop_assert_eq!(&decoded, &data, "pipeline {:?}", specs);
        }
    }

    #[test]
    fn shuffles_preserve_length_for_any_width(
        data in prop::collection::vec(any::<u8>(), 0..2000),
        elem_size in 1u32..17,
    ) {
        let reg = builtin_registry();
        let pipeline = FilterPipeline::new(&reg);
        let specs = [
            FilterSpec::new(FILTER_SHUFFLE, [elem_size]),
            FilterSpec::new(FILTER_BITSHUFFLE, [0, 3, elem_size, 0, 0]),
        ];
        let (stored, _) = pipeline.encode(&data, &specs).unwrap();
        prop_assert_eq!(stored.len(), data.len());
        prop_assert_eq!(pipeline.decode(&stored, &specs, data.len()).unwrap(), data);
    }

    #[test]
    fn decoders_never_panic_on_garbage(garbage in prop::collection::vec(any::<u8>(), 0..256)) {
        let reg = builtin_registry();
        for info in reg.iter() {
            let filter = reg.lookup(info.id).unwrap();
            // Errors are fine; panics are not.
            let _ = filter.decode(&garbage, &[0, 3, 4, 0, 2]);
            let _ = filter.decode(&garbage, &[]);
        }
    }
}

#[test]
fn optional_compressor_is_masked_on_incompressible_chunk() {
    let reg = builtin_registry();
    let pipeline = FilterPipeline::new(&reg);
    let mut state = 0x9E37_79B9_7F4A_7C15u64;
    let noise: Vec<u8> = (0..4096)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            state as u8
        })
        .collect();
    let specs = [
        FilterSpec::new(FILTER_ZSTD, [19]).optional(),
        FilterSpec::new(FILTER_FLETCHER32, []),
    ];
    let (stored, mask) = pipeline.encode(&noise, &specs).unwrap();
    assert_eq!(mask, 0b01);
    assert_eq!(stored.len(), noise.len() + 4);
    let decoded = pipeline
        .decode_chunk(&stored, &specs, mask, noise.len(), &Default::default())
        .unwrap();
    assert_eq!(decoded, noise);
}
