//! Reader and writer settings.
//!
//! Both structs deserialize from JSON with every field optional, so a config
//! file only needs to name what it changes.

use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct ReaderConfig {
    /// Decode the chunks of one region on the rayon thread pool.
    pub parallel: bool,
    /// Verify each chunk's stored checksum before decoding.
    pub verify_checksums: bool,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            parallel: false,
            verify_checksums: true,
        }
    }
}

impl ReaderConfig {
    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct WriterConfig {
    /// Store an xxh3-64 checksum for every chunk.
    pub checksums: bool,
    /// Do not store chunks made entirely of the fill value; readers
    /// reproduce them from the fill value.
    pub skip_fill_chunks: bool,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            checksums: true,
            skip_fill_chunks: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg: ReaderConfig = serde_json::from_str(r#"{"parallel":true}"#).unwrap();
        assert!(cfg.parallel);
        assert!(cfg.verify_checksums);

        let cfg: WriterConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg, WriterConfig::default());
    }
}
