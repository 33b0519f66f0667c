//! Tensor-name manifest parsing
//!
//! The manifest is a UTF-8 file with one tensor name per line. It enumerates
//! every tensor expected across the whole split family and drives the
//! incremental loader's expected-tensor set. Blank lines are skipped and
//! duplicate names collapse.

use std::collections::HashSet;
use std::path::Path;

use tracing::debug;

use crate::error::{Error, Result};
use crate::future_source::FutureByteSource;
use crate::promise::PromiseRegistry;

/// Parse manifest bytes into the expected-tensor set.
///
/// `key` only labels errors; it is the manifest's path or promise key.
pub fn parse(bytes: &[u8], key: &str) -> Result<HashSet<String>> {
    let text = std::str::from_utf8(bytes)
        .map_err(|_| Error::manifest_unavailable(key, "not valid UTF-8"))?;
    let names: HashSet<String> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect();
    if names.is_empty() {
        return Err(Error::manifest_unavailable(key, "no tensor names listed"));
    }
    debug!(key, tensors = names.len(), "parsed tensor manifest");
    Ok(names)
}

/// Read and parse a manifest file from disk.
pub fn from_path<P: AsRef<Path>>(path: P) -> Result<HashSet<String>> {
    let path = path.as_ref();
    let key = path.to_string_lossy();
    let bytes = std::fs::read(path)
        .map_err(|e| Error::manifest_unavailable(key.as_ref(), e.to_string()))?;
    parse(&bytes, key.as_ref())
}

/// Fetch a manifest through the promise registry and parse it.
///
/// Blocks until the producer fulfills `(manifest_key, context)`.
pub fn from_future(
    registry: &PromiseRegistry,
    manifest_key: &str,
    context: &str,
) -> Result<HashSet<String>> {
    if manifest_key.is_empty() {
        return Err(Error::manifest_unavailable(
            "<unset>",
            "future input carries no manifest key",
        ));
    }
    let mut future = FutureByteSource::new(registry, manifest_key, context);
    let bytes = future.extract().take_data();
    parse(&bytes, manifest_key)
}
