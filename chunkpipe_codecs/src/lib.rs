pub mod bitshuffle;
pub mod blosc;
mod deflate;
mod fletcher32;
mod frame;
mod lz4_codec;
pub mod shuffle;
mod zstd_codec;

pub use bitshuffle::BitshuffleFilter;
pub use blosc::BloscFilter;
pub use deflate::DeflateFilter;
pub use fletcher32::{fletcher32, Fletcher32Filter};
pub use lz4_codec::Lz4Filter;
pub use shuffle::ShuffleFilter;
pub use zstd_codec::ZstdFilter;

use std::sync::Arc;

use chunkpipe_core::registry::global_or_init;
use chunkpipe_core::{Filter, FilterRegistry};

// HDF5 registered filter ids.
pub const FILTER_DEFLATE: u32 = 1;
pub const FILTER_SHUFFLE: u32 = 2;
pub const FILTER_FLETCHER32: u32 = 3;
pub const FILTER_BLOSC: u32 = 32001;
pub const FILTER_LZ4: u32 = 32004;
pub const FILTER_BITSHUFFLE: u32 = 32008;
pub const FILTER_ZSTD: u32 = 32015;

/// One instance of every bundled filter.
pub fn builtin_filters() -> Vec<Arc<dyn Filter>> {
    vec![
        Arc::new(DeflateFilter),
        Arc::new(ShuffleFilter),
        Arc::new(Fletcher32Filter),
        Arc::new(BloscFilter),
        Arc::new(Lz4Filter),
        Arc::new(BitshuffleFilter),
        Arc::new(ZstdFilter),
    ]
}

/// A fresh registry holding every bundled filter. Add custom filters to it
/// before installing it process-wide.
pub fn builtin_registry() -> FilterRegistry {
    let mut registry = FilterRegistry::new();
    for filter in builtin_filters() {
        if let Err(e) = registry.register(filter) {
            log::warn!("skipping bundled filter: {e}");
        }
    }
    registry
}

/// The process-wide registry, initialised with the bundled filters on first
/// use unless another registry was installed earlier.
pub fn registry() -> &'static FilterRegistry {
    global_or_init(builtin_registry)
}
