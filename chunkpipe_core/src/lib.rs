pub mod codec;
pub mod config;
pub mod error;
pub mod format;
pub mod grid;
pub mod meta;
pub mod pipeline;
pub mod reader;
pub mod registry;
pub mod store;
pub mod types;
pub mod view;
pub mod writer;

pub use codec::{Filter, FilterInfo, FilterSpec};
pub use config::{ReaderConfig, WriterConfig};
pub use error::{ChunkCoords, CodecError, Error, Result};
pub use format::{ChunkEntry, FileHeader, HEADER_SIZE, MAGIC};
pub use grid::Region;
pub use meta::ArrayMeta;
pub use pipeline::FilterPipeline;
pub use reader::{ArrayReader, ChunkDescriptor};
pub use registry::FilterRegistry;
pub use store::{ChunkStore, FileStore, MemoryStore};
pub use types::{ByteOrder, DType, Element, FillValue};
pub use view::ArrayView;
pub use writer::ArrayWriter;
