//! Incremental loading of tensor metadata across split files
//!
//! The [`IncrementalSplitLoader`] coordinates on-demand loading of later
//! splits, driven by a pre-known manifest of expected tensor names. Split 0
//! is parsed up front; splits 1..N-1 exist only as descriptors until a
//! requested tensor forces them open. The loader tracks which split every
//! tensor lives in and how many of a split's tensors have been consumed, so
//! a split can be released as soon as all of its tensors are through.

use std::collections::{HashMap, HashSet};

use candle_core::{Device, DeviceLocation};
use tracing::debug;

use crate::error::{Error, Result};
use crate::loader::LoaderState;
use crate::split::SplitDescriptor;

/// Where one expected tensor lives and whether it was consumed.
#[derive(Debug)]
struct TensorEntry {
    split_idx: u16,
    loaded: bool,
}

/// Per-split bookkeeping.
#[derive(Default, Debug)]
struct SplitInfo {
    total_tensor_count: u32,
    loaded_tensor_count: u32,
    data_size: u64,
}

impl SplitInfo {
    fn all_tensors_loaded(&self) -> bool {
        self.loaded_tensor_count >= self.total_tensor_count
    }
}

/// Coordinates metadata loads across a family of split files.
#[derive(Debug)]
pub struct IncrementalSplitLoader {
    /// Closed set of tensor names declared by the manifest.
    expected_tensors: HashSet<String>,
    tensor_info: HashMap<String, TensorEntry>,
    split_info: HashMap<u16, SplitInfo>,
    /// Descriptors for splits 1..N-1; split 0 is loaded at construction.
    delayed_files: Vec<SplitDescriptor>,
    /// Number of delayed splits already opened; monotonic.
    delayed_loaded: usize,
    /// Allocation group per (backend buffer location, split index).
    ctx_split_map: HashMap<(DeviceLocation, u16), usize>,
}

impl IncrementalSplitLoader {
    /// Build the loader over an already-registered base split (index 0).
    ///
    /// Registers split 0's tensors against `expected_tensors` immediately;
    /// descriptors for the remaining splits are appended with
    /// [`add_split`](Self::add_split).
    pub fn new(state: &mut LoaderState, expected_tensors: HashSet<String>) -> Result<Self> {
        let mut loader = Self {
            expected_tensors,
            tensor_info: HashMap::new(),
            split_info: HashMap::new(),
            delayed_files: Vec::new(),
            delayed_loaded: 0,
            ctx_split_map: HashMap::new(),
        };
        loader.process_split(state, 0)?;
        Ok(loader)
    }

    /// Append the descriptor of the next delayed split.
    pub fn add_split(&mut self, descriptor: SplitDescriptor) {
        // +1 because the first split is loaded at construction, not delayed
        self.split_info
            .insert(self.delayed_files.len() as u16 + 1, SplitInfo::default());
        self.delayed_files.push(descriptor);
    }

    fn load_split(&mut self, state: &mut LoaderState, idx: u16) -> Result<()> {
        // -1 because split 0 is not present in delayed_files
        self.delayed_files[idx as usize - 1].load(state)?;
        self.process_split(state, idx)
    }

    /// Register every tensor the freshly-parsed split `idx` declares.
    fn process_split(&mut self, state: &mut LoaderState, idx: u16) -> Result<()> {
        let split = self.split_info.entry(idx).or_default();
        for name in state.split_tensors(idx) {
            if !self.expected_tensors.contains(name) {
                return Err(Error::unknown_tensor(name));
            }
            split.total_tensor_count += 1;
            self.tensor_info.insert(
                name.clone(),
                TensorEntry {
                    split_idx: idx,
                    loaded: false,
                },
            );
            let weight = state
                .weights_map()
                .get(name)
                .ok_or_else(|| Error::missing_weight(name))?;
            split.data_size += weight.nbytes as u64;
        }
        Ok(())
    }

    /// Resolve the split holding `name`, loading delayed splits as needed,
    /// and mark the tensor consumed. Returns the split index.
    pub fn load_tensor_metadata(&mut self, state: &mut LoaderState, name: &str) -> Result<u16> {
        debug!(
            tensor = name,
            delayed_loaded = self.delayed_loaded,
            delayed_total = self.delayed_files.len(),
            "loading tensor metadata"
        );
        if !self.expected_tensors.contains(name) {
            return Err(Error::unknown_tensor(name));
        }

        let mut found = state.weights_map().contains_key(name);
        while !found && self.delayed_loaded < self.delayed_files.len() {
            // +1 because the first split is loaded at construction
            self.load_split(state, self.delayed_loaded as u16 + 1)?;
            found = state.weights_map().contains_key(name);
            self.delayed_loaded += 1;
            if found {
                debug!(tensor = name, split = self.delayed_loaded, "tensor found");
            }
            if self.delayed_loaded == self.delayed_files.len()
                && state.weights_map().len() != self.expected_tensors.len()
            {
                return Err(Error::TensorCountMismatch {
                    expected: self.expected_tensors.len(),
                    found: state.weights_map().len(),
                });
            }
        }

        let entry = self
            .tensor_info
            .get_mut(name)
            .ok_or_else(|| Error::missing_weight(name))?;
        let split_idx = entry.split_idx;
        if !entry.loaded {
            entry.loaded = true;
            if let Some(split) = self.split_info.get_mut(&split_idx) {
                split.loaded_tensor_count += 1;
            }
        }
        Ok(split_idx)
    }

    fn split(&self, split_idx: u16) -> Result<&SplitInfo> {
        self.split_info.get(&split_idx).ok_or_else(|| {
            Error::model_loading(format!("split index {split_idx} not found in split info map"))
        })
    }

    /// Whether every tensor of `split_idx` has been consumed.
    pub fn all_tensors_are_loaded(&self, split_idx: u16) -> Result<bool> {
        Ok(self.split(split_idx)?.all_tensors_loaded())
    }

    /// `(consumed, total)` tensor counts for a split.
    pub fn split_tensor_counts(&self, split_idx: u16) -> Result<(u32, u32)> {
        let split = self.split(split_idx)?;
        Ok((split.loaded_tensor_count, split.total_tensor_count))
    }

    /// Total tensor data bytes registered for a split.
    pub fn split_data_size(&self, split_idx: u16) -> Result<u64> {
        Ok(self.split(split_idx)?.data_size)
    }

    /// Split index a known tensor resides in.
    pub fn split_idx_for_tensor(&self, name: &str) -> Result<u16> {
        self.tensor_info
            .get(name)
            .map(|entry| entry.split_idx)
            .ok_or_else(|| Error::missing_weight(name))
    }

    /// Number of tensors the manifest declares.
    pub fn expected_n_tensors(&self) -> usize {
        self.expected_tensors.len()
    }

    /// Whether `name` is part of the manifest.
    pub fn is_expected(&self, name: &str) -> bool {
        self.expected_tensors.contains(name)
    }

    /// True once every delayed split has been opened.
    pub fn all_delayed_loaded(&self) -> bool {
        self.delayed_loaded == self.delayed_files.len()
    }

    /// Drop the byte source of a fully-consumed split.
    pub fn release_split(&self, state: &mut LoaderState, split_idx: u16) -> Result<()> {
        state.release_file(split_idx)
    }

    /// Lazily allocate the model-construction group for `(device,
    /// split_idx)`, sized for the split's tensor count. Tensors of one split
    /// share one group so the upstream layer can commit them to a backend
    /// buffer at once.
    pub fn ctx_for_split(
        &mut self,
        state: &mut LoaderState,
        device: &Device,
        split_idx: u16,
    ) -> Result<usize> {
        let key = (device.location(), split_idx);
        if let Some(&group) = self.ctx_split_map.get(&key) {
            return Ok(group);
        }
        let capacity = self.split(split_idx)?.total_tensor_count as usize;
        let group = state.new_group(split_idx, capacity);
        self.ctx_split_map.insert(key, group);
        Ok(group)
    }

    /// Whether the upstream layer should skip `name` entirely: there is no
    /// incremental state (single-split load) or the manifest does not list
    /// the tensor.
    pub fn tensor_ignored(loader: Option<&Self>, name: &str) -> bool {
        loader.map_or(true, |l| !l.expected_tensors.contains(name))
    }

    /// Dump the currently known tensor→split assignments at debug level.
    pub fn log_known_tensors(&self) {
        for (name, entry) in &self.tensor_info {
            debug!(
                tensor = %name,
                split = entry.split_idx,
                loaded = entry.loaded,
                "known tensor"
            );
        }
    }
}
