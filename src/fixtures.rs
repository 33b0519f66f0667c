//! GGUF fixture generation for tests
//!
//! A minimal writer for valid GGUF v3 containers, enough to exercise the
//! split loader against real parseable bytes: F32 tensors, integer and
//! string metadata, split families with their manifest. Not a general
//! container writer; production models are written by other tools.

use std::path::{Path, PathBuf};

use crate::container::{KV_SPLIT_COUNT, KV_SPLIT_NO, KV_SPLIT_TENSORS_COUNT};
use crate::load_input::{manifest_path, split_path};

const GGUF_MAGIC: u32 = 0x4655_4747;
const GGUF_VERSION: u32 = 3;
const ALIGNMENT: usize = 32;

// GGUF metadata value type tags
const TYPE_U16: u32 = 2;
const TYPE_I32: u32 = 5;
const TYPE_STRING: u32 = 8;

enum KvValue {
    U16(u16),
    I32(i32),
    Str(String),
}

/// Builder for one GGUF container.
#[derive(Default)]
pub struct GgufBuilder {
    kvs: Vec<(String, KvValue)>,
    tensors: Vec<(String, Vec<f32>)>,
}

fn push_string(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(&(s.len() as u64).to_le_bytes());
    out.extend_from_slice(s.as_bytes());
}

fn pad_to_alignment(out: &mut Vec<u8>) {
    while out.len() % ALIGNMENT != 0 {
        out.push(0);
    }
}

impl GgufBuilder {
    /// Empty container builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a `u16` metadata value.
    pub fn kv_u16(mut self, key: &str, value: u16) -> Self {
        self.kvs.push((key.to_string(), KvValue::U16(value)));
        self
    }

    /// Add an `i32` metadata value.
    pub fn kv_i32(mut self, key: &str, value: i32) -> Self {
        self.kvs.push((key.to_string(), KvValue::I32(value)));
        self
    }

    /// Add a string metadata value.
    pub fn kv_str(mut self, key: &str, value: &str) -> Self {
        self.kvs
            .push((key.to_string(), KvValue::Str(value.to_string())));
        self
    }

    /// Add a one-dimensional F32 tensor.
    pub fn tensor_f32(mut self, name: &str, data: &[f32]) -> Self {
        self.tensors.push((name.to_string(), data.to_vec()));
        self
    }

    /// Serialize the container.
    pub fn build(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&GGUF_MAGIC.to_le_bytes());
        out.extend_from_slice(&GGUF_VERSION.to_le_bytes());
        out.extend_from_slice(&(self.tensors.len() as u64).to_le_bytes());
        out.extend_from_slice(&(self.kvs.len() as u64).to_le_bytes());

        for (key, value) in &self.kvs {
            push_string(&mut out, key);
            match value {
                KvValue::U16(v) => {
                    out.extend_from_slice(&TYPE_U16.to_le_bytes());
                    out.extend_from_slice(&v.to_le_bytes());
                }
                KvValue::I32(v) => {
                    out.extend_from_slice(&TYPE_I32.to_le_bytes());
                    out.extend_from_slice(&v.to_le_bytes());
                }
                KvValue::Str(v) => {
                    out.extend_from_slice(&TYPE_STRING.to_le_bytes());
                    push_string(&mut out, v);
                }
            }
        }

        // tensor infos with 32-aligned offsets into the data section
        let mut offset = 0u64;
        for (name, data) in &self.tensors {
            push_string(&mut out, name);
            out.extend_from_slice(&1u32.to_le_bytes()); // n_dims
            out.extend_from_slice(&(data.len() as u64).to_le_bytes());
            out.extend_from_slice(&0u32.to_le_bytes()); // ggml type F32
            out.extend_from_slice(&offset.to_le_bytes());

            let nbytes = data.len() * 4;
            offset += nbytes.div_ceil(ALIGNMENT) as u64 * ALIGNMENT as u64;
        }

        pad_to_alignment(&mut out);
        for (_, data) in &self.tensors {
            for value in data {
                out.extend_from_slice(&value.to_le_bytes());
            }
            pad_to_alignment(&mut out);
        }
        out
    }
}

/// Serialize a whole split family, one container per tensor group.
///
/// Every container carries the standard split KVs; split `i` declares index
/// `i` of `groups.len()`.
pub fn split_family_bytes(groups: &[Vec<(&str, Vec<f32>)>]) -> Vec<Vec<u8>> {
    let count = groups.len() as u16;
    let total: i32 = groups.iter().map(|g| g.len() as i32).sum();
    groups
        .iter()
        .enumerate()
        .map(|(idx, group)| {
            let mut builder = GgufBuilder::new()
                .kv_u16(KV_SPLIT_NO, idx as u16)
                .kv_u16(KV_SPLIT_COUNT, count)
                .kv_i32(KV_SPLIT_TENSORS_COUNT, total);
            for (name, data) in group {
                builder = builder.tensor_f32(name, data);
            }
            builder.build()
        })
        .collect()
}

/// Write a split family to `dir` following the naming convention, returning
/// the file paths in index order.
pub fn write_split_family(
    dir: &Path,
    prefix: &str,
    groups: &[Vec<(&str, Vec<f32>)>],
) -> Vec<PathBuf> {
    let count = groups.len() as u16;
    let full_prefix = dir.join(prefix).to_string_lossy().into_owned();
    split_family_bytes(groups)
        .into_iter()
        .enumerate()
        .map(|(idx, bytes)| {
            let path = PathBuf::from(split_path(&full_prefix, idx as u16, count));
            std::fs::write(&path, bytes).expect("failed to write split fixture");
            path
        })
        .collect()
}

/// Manifest bytes for a set of tensor names.
pub fn manifest_bytes(names: &[&str]) -> Vec<u8> {
    let mut out = String::new();
    for name in names {
        out.push_str(name);
        out.push('\n');
    }
    out.into_bytes()
}

/// Write the conventional manifest file next to a split family.
pub fn write_manifest(dir: &Path, prefix: &str, names: &[&str]) -> PathBuf {
    let full_prefix = dir.join(prefix).to_string_lossy().into_owned();
    let path = PathBuf::from(manifest_path(&full_prefix));
    std::fs::write(&path, manifest_bytes(names)).expect("failed to write manifest fixture");
    path
}
