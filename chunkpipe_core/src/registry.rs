use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::codec::{Filter, FilterInfo};
use crate::error::{Error, Result};

/// Table mapping filter ids to filter implementations.
///
/// Built mutably, then frozen: once a registry is shared (behind `&` or
/// installed as the process-wide instance) it is only ever read, so lookups
/// from any number of threads need no locking.
#[derive(Default, Clone)]
pub struct FilterRegistry {
    filters: BTreeMap<u32, Arc<dyn Filter>>,
}

impl FilterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a filter. Fails if a filter with the same id is already present.
    pub fn register(&mut self, filter: Arc<dyn Filter>) -> Result<()> {
        let id = filter.id();
        if self.filters.contains_key(&id) {
            return Err(Error::DuplicateFilterId { id });
        }
        log::debug!("registered filter {} ({})", id, filter.name());
        self.filters.insert(id, filter);
        Ok(())
    }

    /// Builder-style `register`.
    pub fn with(mut self, filter: Arc<dyn Filter>) -> Result<Self> {
        self.register(filter)?;
        Ok(self)
    }

    pub fn lookup(&self, id: u32) -> Result<&Arc<dyn Filter>> {
        self.filters.get(&id).ok_or(Error::UnknownFilterId { id })
    }

    /// Find a filter by its display name (case-insensitive).
    pub fn lookup_name(&self, name: &str) -> Option<&Arc<dyn Filter>> {
        self.filters
            .values()
            .find(|f| f.name().eq_ignore_ascii_case(name))
    }

    pub fn contains(&self, id: u32) -> bool {
        self.filters.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Descriptors of all registered filters, ordered by id.
    pub fn iter(&self) -> impl Iterator<Item = FilterInfo> + '_ {
        self.filters.values().map(|f| f.info())
    }
}

impl fmt::Debug for FilterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

// ── Process-wide instance ─────────────────────────────────────────────────

static GLOBAL: OnceLock<FilterRegistry> = OnceLock::new();

/// Install `registry` as the process-wide registry.
///
/// Must complete before any reader thread starts; fails if a registry was
/// already installed (including one created lazily by [`global_or_init`]).
pub fn install(registry: FilterRegistry) -> Result<&'static FilterRegistry> {
    GLOBAL
        .set(registry)
        .map_err(|_| Error::RegistryInitialized)?;
    GLOBAL.get().ok_or(Error::RegistryInitialized)
}

/// The process-wide registry, if one has been installed.
pub fn global() -> Option<&'static FilterRegistry> {
    GLOBAL.get()
}

/// The process-wide registry, built with `init` on first use.
pub fn global_or_init(init: impl FnOnce() -> FilterRegistry) -> &'static FilterRegistry {
    GLOBAL.get_or_init(init)
}

#[cfg(test)]
pub(crate) mod test_filters {
    use super::*;
    use crate::error::CodecError;

    /// XORs every byte with the first parameter (default 0xFF).
    pub struct XorFilter;

    impl Filter for XorFilter {
        fn id(&self) -> u32 {
            900
        }
        fn name(&self) -> &'static str {
            "xor"
        }
        fn decode(&self, input: &[u8], params: &[u32]) -> Result<Vec<u8>, CodecError> {
            self.encode(input, params)
        }
        fn encode(&self, input: &[u8], params: &[u32]) -> Result<Vec<u8>, CodecError> {
            let key = params.first().copied().unwrap_or(0xFF) as u8;
            Ok(input.iter().map(|b| b ^ key).collect())
        }
        fn can_encode(&self) -> bool {
            true
        }
    }

    /// Prepends a one-byte length tag; decode rejects a wrong tag.
    pub struct TagFilter;

    impl Filter for TagFilter {
        fn id(&self) -> u32 {
            901
        }
        fn name(&self) -> &'static str {
            "tag"
        }
        fn decode(&self, input: &[u8], _params: &[u32]) -> Result<Vec<u8>, CodecError> {
            let (&tag, rest) = input
                .split_first()
                .ok_or_else(|| CodecError::corrupt("empty tagged buffer"))?;
            if tag as usize != rest.len() % 256 {
                return Err(CodecError::corrupt(format!(
                    "tag {} does not match payload length {}",
                    tag,
                    rest.len()
                )));
            }
            Ok(rest.to_vec())
        }
        fn encode(&self, input: &[u8], _params: &[u32]) -> Result<Vec<u8>, CodecError> {
            let mut out = Vec::with_capacity(input.len() + 1);
            out.push((input.len() % 256) as u8);
            out.extend_from_slice(input);
            Ok(out)
        }
        fn can_encode(&self) -> bool {
            true
        }
    }

    /// Decode-only filter that reverses bytes.
    pub struct ReverseDecoder;

    impl Filter for ReverseDecoder {
        fn id(&self) -> u32 {
            902
        }
        fn name(&self) -> &'static str {
            "reverse"
        }
        fn decode(&self, input: &[u8], _params: &[u32]) -> Result<Vec<u8>, CodecError> {
            Ok(input.iter().rev().copied().collect())
        }
    }

    pub fn registry() -> FilterRegistry {
        FilterRegistry::new()
            .with(Arc::new(XorFilter))
            .and_then(|r| r.with(Arc::new(TagFilter)))
            .and_then(|r| r.with(Arc::new(ReverseDecoder)))
            .unwrap()
    }
}
