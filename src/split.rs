//! Lazy loading of one split file
//!
//! A [`SplitDescriptor`] remembers everything needed to open one split of a
//! family later: its assigned index, where its bytes come from, and the
//! metadata key under which the split records its own index. The first
//! `load` parses the container, validates the split's self-declared index
//! and the loading order, and registers its tensors with the loader state;
//! further calls are no-ops.

use std::borrow::Cow;
use std::path::PathBuf;

use tracing::info;

use crate::container::SplitContainer;
use crate::error::{Error, Result};
use crate::loader::LoaderState;
use crate::promise::PromiseRegistry;

/// Where one split's bytes come from.
#[derive(Debug)]
pub enum SplitOrigin {
    /// A file on disk.
    Path(PathBuf),
    /// A promised buffer under `(key, context)`.
    Future {
        /// Promise key of this split.
        key: String,
        /// Context disambiguating the load.
        context: String,
        /// Registry the producer delivers into.
        registry: PromiseRegistry,
    },
}

/// One split's identity and lazy loader.
#[derive(Debug)]
pub struct SplitDescriptor {
    idx: u16,
    origin: SplitOrigin,
    kv_split_no: String,
    loaded: bool,
}

impl SplitDescriptor {
    /// Describe split `idx` without opening it. `kv_split_no` is the
    /// metadata key carrying the split's own index.
    pub fn new(idx: u16, origin: SplitOrigin, kv_split_no: impl Into<String>) -> Self {
        Self {
            idx,
            origin,
            kv_split_no: kv_split_no.into(),
            loaded: false,
        }
    }

    /// Index this split was assigned within its family.
    pub fn idx(&self) -> u16 {
        self.idx
    }

    /// Whether `load` already ran.
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Printable identity: the path for disk splits, the key for promised
    /// ones.
    pub fn identifier(&self) -> Cow<'_, str> {
        match &self.origin {
            SplitOrigin::Path(path) => path.to_string_lossy(),
            SplitOrigin::Future { key, .. } => Cow::Borrowed(key.as_str()),
        }
    }

    /// Open and register this split with the loader state.
    ///
    /// Validates the split's self-declared index against the assigned one
    /// and enforces strictly increasing loading order. Once loaded, later
    /// calls return immediately.
    pub fn load(&mut self, state: &mut LoaderState) -> Result<()> {
        if self.loaded {
            return Ok(());
        }

        info!(split = self.idx, id = %self.identifier(), "loading split file");
        let container = match &self.origin {
            SplitOrigin::Path(path) => SplitContainer::from_path(path)?,
            SplitOrigin::Future {
                key,
                context,
                registry,
            } => SplitContainer::from_future(registry, key, context)?,
        };

        if self.idx > 0 {
            let declared = container.kv_u16(&self.kv_split_no)?;
            if declared != self.idx {
                return Err(Error::SplitIndexMismatch {
                    expected: self.idx,
                    found: declared,
                    split: self.identifier().into_owned(),
                });
            }
        }

        // Splits are appended in order: this split's index must equal the
        // number of splits already registered.
        if state.loaded_split_count() != self.idx as usize {
            return Err(Error::SplitOrderViolation {
                expected: state.loaded_split_count(),
                found: self.idx,
            });
        }

        state.register_split(container, self.idx)?;
        self.loaded = true;
        Ok(())
    }
}
