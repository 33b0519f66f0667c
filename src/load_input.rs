//! Where a model comes from
//!
//! [`LoadInput`] names the provenance of model bytes: a file path, an owned
//! byte buffer presented once, or a family of promised buffers delivered
//! asynchronously through a [`PromiseRegistry`]. The loader facade consumes
//! the variant; everything downstream only sees [`ByteSource`]s.
//!
//! This module also hosts the split naming convention,
//! `<prefix>-NNNNN-of-MMMMM.gguf` with a 1-based five-digit index, and the
//! sibling manifest convention `<prefix>.tensors.txt`.
//!
//! [`ByteSource`]: crate::byte_source::ByteSource

use std::borrow::Cow;
use std::path::PathBuf;

use crate::promise::PromiseRegistry;

/// Sentinel identifier for buffer inputs, which have no path.
const BUFFER_IDENTIFIER: &str = "buffer";

/// Compose the conventional path of one split file.
///
/// `split_idx` is 0-based; the filename carries it 1-based.
pub fn split_path(prefix: &str, split_idx: u16, split_count: u16) -> String {
    format!("{prefix}-{:05}-of-{:05}.gguf", split_idx + 1, split_count)
}

/// Parse a split file name back into `(prefix, split_idx, split_count)`.
///
/// Returns `None` when `path` does not follow the naming convention.
/// `split_idx` is returned 0-based.
pub fn split_prefix(path: &str) -> Option<(String, u16, u16)> {
    let (stem, _ext) = path.rsplit_once('.')?;
    let (rest, count_str) = stem.rsplit_once("-of-")?;
    let (prefix, no_str) = rest.rsplit_once('-')?;
    if no_str.len() != 5 || count_str.len() != 5 {
        return None;
    }
    let no: u16 = no_str.parse().ok()?;
    let count: u16 = count_str.parse().ok()?;
    if prefix.is_empty() || no == 0 || no > count {
        return None;
    }
    Some((prefix.to_string(), no - 1, count))
}

/// Conventional path of the tensor-name manifest for a split family.
pub fn manifest_path(prefix: &str) -> String {
    format!("{prefix}.tensors.txt")
}

/// Tagged description of where a model load reads its bytes from.
pub enum LoadInput {
    /// A container file on disk, with optional explicit sibling split paths.
    /// An empty split list means "derive siblings from the naming
    /// convention" when the container declares more than one split.
    Path {
        /// Path of the base (first) split.
        path: PathBuf,
        /// Explicit split family, base included. May be empty.
        splits: Vec<PathBuf>,
    },

    /// An owned byte buffer presented once and consumed by move. Buffers
    /// carry exactly one split; split families cannot be expressed.
    Buffer {
        /// The container bytes.
        data: Vec<u8>,
    },

    /// Buffers promised by a producer thread under logical keys.
    Future {
        /// Promise key of the base split (conventionally its path).
        key: String,
        /// Disambiguates concurrent loads sharing keys.
        context: String,
        /// Promise keys of the whole split family, base included. May be
        /// empty, in which case siblings are derived from the naming
        /// convention applied to `key`.
        splits: Vec<String>,
        /// Promise key of the tensor-name manifest.
        manifest_key: String,
        /// The registry producers deliver into.
        registry: PromiseRegistry,
    },
}

impl LoadInput {
    /// Path input without an explicit split list.
    pub fn path(path: impl Into<PathBuf>) -> Self {
        Self::Path {
            path: path.into(),
            splits: Vec::new(),
        }
    }

    /// Buffer input.
    pub fn buffer(data: Vec<u8>) -> Self {
        Self::Buffer { data }
    }

    /// Future input over `registry`.
    pub fn future(
        key: impl Into<String>,
        context: impl Into<String>,
        splits: Vec<String>,
        manifest_key: impl Into<String>,
        registry: &PromiseRegistry,
    ) -> Self {
        Self::Future {
            key: key.into(),
            context: context.into(),
            splits,
            manifest_key: manifest_key.into(),
            registry: registry.clone(),
        }
    }

    /// Printable identity of this input: the path or key for path-like
    /// inputs, the `"buffer"` sentinel otherwise.
    pub fn identifier(&self) -> Cow<'_, str> {
        match self {
            Self::Path { path, .. } => path.to_string_lossy(),
            Self::Buffer { .. } => Cow::Borrowed(BUFFER_IDENTIFIER),
            Self::Future { key, .. } => Cow::Borrowed(key.as_str()),
        }
    }

    /// Whether this input can address sibling splits at all.
    pub fn supports_split_load(&self) -> bool {
        matches!(self, Self::Path { .. } | Self::Future { .. })
    }

    /// Whether sibling splits can be delivered from memory.
    pub fn supports_split_load_from_memory(&self) -> bool {
        matches!(self, Self::Future { .. })
    }

    /// The split family `(base, siblings)` for inputs that have one.
    pub fn split_family(&self) -> Option<(String, Vec<String>)> {
        match self {
            Self::Path { path, splits } => Some((
                path.to_string_lossy().into_owned(),
                splits
                    .iter()
                    .map(|p| p.to_string_lossy().into_owned())
                    .collect(),
            )),
            Self::Buffer { .. } => None,
            Self::Future { key, splits, .. } => Some((key.clone(), splits.clone())),
        }
    }
}
