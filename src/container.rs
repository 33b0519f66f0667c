//! One parsed split container
//!
//! The GGUF parsing itself is delegated to candle's `gguf_file` module; this
//! crate only consumes its contract: a metadata map, a tensor-info table and
//! the offset where tensor data begins. A [`SplitContainer`] couples that
//! parsed header with the [`ByteSource`] it was read from, so tensor data
//! can later be read from the same source.

use candle_core::quantized::gguf_file::{Content, TensorInfo};

use crate::byte_source::ByteSource;
use crate::error::{Error, Result};
use crate::future_source::FutureByteSource;
use crate::promise::PromiseRegistry;

/// Metadata key under which a split records its own 0-based index.
pub const KV_SPLIT_NO: &str = "split.no";
/// Metadata key carrying the total number of splits in the family.
pub const KV_SPLIT_COUNT: &str = "split.count";
/// Metadata key carrying the total tensor count across the family.
pub const KV_SPLIT_TENSORS_COUNT: &str = "split.tensors.count";

/// A parsed split header plus the byte source its tensor data lives in.
#[derive(Debug)]
pub struct SplitContainer {
    /// Parsed GGUF header: metadata KVs and tensor infos.
    pub meta: Content,
    /// The source the header was parsed from; tensor data is read from here.
    pub source: ByteSource,
}

impl SplitContainer {
    /// Parse a container from a disk file.
    pub fn from_path<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let source = ByteSource::disk(path)?;
        Self::parse(source, &path.to_string_lossy())
    }

    /// Parse a container from an owned buffer.
    pub fn from_buffer(data: Vec<u8>) -> Result<Self> {
        Self::parse(ByteSource::buffer(data), "buffer")
    }

    /// Parse a container from a promised buffer; blocks until the producer
    /// fulfills `(key, context)`.
    pub fn from_future(registry: &PromiseRegistry, key: &str, context: &str) -> Result<Self> {
        let source = ByteSource::Future(FutureByteSource::new(registry, key, context));
        Self::parse(source, key)
    }

    fn parse(mut source: ByteSource, id: &str) -> Result<Self> {
        let meta = Content::read(&mut source)
            .map_err(|e| Error::model_loading(format!("failed to load model from {id}: {e}")))?;
        Ok(Self { meta, source })
    }

    /// Read an integer metadata value under `key`.
    pub fn kv_u16(&self, key: &str) -> Result<u16> {
        let value = self
            .meta
            .metadata
            .get(key)
            .ok_or_else(|| Error::model_loading(format!("missing key {key} in GGUF split")))?;
        Ok(value.to_u16()?)
    }

    /// The split's self-declared 0-based index under the standard key.
    pub fn split_no(&self) -> Result<u16> {
        self.kv_u16(KV_SPLIT_NO)
    }

    /// Number of splits in the family; 1 when the key is absent.
    pub fn split_count(&self) -> Result<u16> {
        match self.meta.metadata.get(KV_SPLIT_COUNT) {
            Some(value) => Ok(value.to_u16()?),
            None => Ok(1),
        }
    }

    /// Tensor names declared by this split, sorted for determinism.
    pub fn tensor_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.meta.tensor_infos.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of tensors declared by this split.
    pub fn n_tensors(&self) -> usize {
        self.meta.tensor_infos.len()
    }

    /// Absolute byte offset of a tensor's data within this split's source.
    pub fn absolute_offset(&self, info: &TensorInfo) -> u64 {
        self.meta.tensor_data_offset + info.offset
    }

    /// Size in bytes of a tensor's data, from its dtype and shape.
    pub fn tensor_nbytes(info: &TensorInfo) -> usize {
        info.shape.elem_count() / info.ggml_dtype.block_size() * info.ggml_dtype.type_size()
    }
}
