//! High-level model loading API
//!
//! This module provides the entry points the model-construction layer calls:
//! open a model from a path, a byte buffer, or a family of promised buffers,
//! then stream tensor metadata by name. Multi-split models are loaded
//! incrementally when a tensor manifest is available and eagerly otherwise;
//! single-split models skip the incremental machinery entirely.

use std::collections::HashMap;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use candle_core::quantized::GgmlDType;
use candle_core::Device;
use memmap2::Mmap;
use tracing::{debug, info};

use crate::byte_source::ByteSource;
use crate::container::{SplitContainer, KV_SPLIT_NO};
use crate::error::{Error, Result};
use crate::incremental::IncrementalSplitLoader;
use crate::load_input::{manifest_path, split_path, split_prefix, LoadInput};
use crate::manifest;
use crate::progress::{ProgressEvent, ProgressFn};
use crate::promise::PromiseRegistry;
use crate::split::{SplitDescriptor, SplitOrigin};

/// Options for model loading
pub struct LoadOptions {
    /// Progress callback function
    pub progress: Option<ProgressFn>,
}

impl std::fmt::Debug for LoadOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadOptions")
            .field("progress", &self.progress.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

impl LoadOptions {
    /// Create default options
    pub fn new() -> Self {
        Self { progress: None }
    }

    /// Enable progress reporting with default console output
    pub fn with_progress(mut self) -> Self {
        self.progress = Some(crate::progress::default_progress());
        self
    }

    /// Set custom progress callback
    pub fn with_custom_progress(mut self, progress_fn: ProgressFn) -> Self {
        self.progress = Some(progress_fn);
        self
    }
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// One tensor's weight record: where its bytes live and what they are.
#[derive(Debug, Clone)]
pub struct TensorWeight {
    /// Split the tensor's data resides in.
    pub split_idx: u16,
    /// Absolute byte offset within that split's source.
    pub offset: u64,
    /// GGML data type.
    pub dtype: GgmlDType,
    /// Tensor dimensions.
    pub shape: Vec<usize>,
    /// Data size in bytes.
    pub nbytes: usize,
}

/// Tensor metadata returned to the model-construction layer.
#[derive(Debug, Clone)]
pub struct TensorMeta {
    /// Tensor name.
    pub name: String,
    /// Split the tensor resides in.
    pub split_idx: u16,
    /// GGML data type.
    pub dtype: GgmlDType,
    /// Tensor dimensions.
    pub shape: Vec<usize>,
    /// Absolute byte offset within the split's source.
    pub offset: u64,
    /// Data size in bytes.
    pub nbytes: usize,
}

/// An allocation group holding all tensors of one split for one backend
/// buffer location.
#[derive(Debug, Clone)]
pub struct TensorGroup {
    /// Split the group belongs to.
    pub split_idx: u16,
    /// Number of tensors the group is sized for.
    pub capacity: usize,
}

/// Per-load mutable state: opened sources, the merged weights map and the
/// allocation groups. Confined to the thread that opened the model.
#[derive(Default, Debug)]
pub struct LoaderState {
    files: Vec<Option<ByteSource>>,
    split_tensors: Vec<Vec<String>>,
    weights_map: HashMap<String, TensorWeight>,
    groups: Vec<TensorGroup>,
}

impl LoaderState {
    /// Empty state; splits are registered as they are parsed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of splits registered so far.
    pub fn loaded_split_count(&self) -> usize {
        self.files.len()
    }

    /// The merged tensor-name → weight-record map.
    pub fn weights_map(&self) -> &HashMap<String, TensorWeight> {
        &self.weights_map
    }

    /// Tensor names registered by split `idx`, sorted.
    pub fn split_tensors(&self, idx: u16) -> &[String] {
        self.split_tensors
            .get(idx as usize)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Merge a parsed split into the weights map and keep its source.
    ///
    /// Fails when a tensor name already arrived through an earlier split.
    pub fn register_split(&mut self, container: SplitContainer, idx: u16) -> Result<()> {
        let SplitContainer { meta, source } = container;
        let mut names: Vec<String> = meta.tensor_infos.keys().cloned().collect();
        names.sort();
        for name in &names {
            let info = &meta.tensor_infos[name];
            let weight = TensorWeight {
                split_idx: idx,
                offset: meta.tensor_data_offset + info.offset,
                dtype: info.ggml_dtype,
                shape: info.shape.dims().to_vec(),
                nbytes: SplitContainer::tensor_nbytes(info),
            };
            if self.weights_map.insert(name.clone(), weight).is_some() {
                return Err(Error::model_loading(format!(
                    "invalid model: tensor '{name}' is duplicated"
                )));
            }
        }
        debug!(split = idx, tensors = names.len(), "registered split");
        self.files.push(Some(source));
        self.split_tensors.push(names);
        Ok(())
    }

    /// Drop the byte source of split `idx`. Idempotent.
    pub fn release_file(&mut self, idx: u16) -> Result<()> {
        match self.files.get_mut(idx as usize) {
            Some(slot) => {
                *slot = None;
                Ok(())
            }
            None => Err(Error::model_loading(format!(
                "split index {idx} was never loaded"
            ))),
        }
    }

    /// Mutable access to a split's byte source; released splits fail.
    pub fn source_for(&mut self, idx: u16) -> Result<&mut ByteSource> {
        self.files
            .get_mut(idx as usize)
            .ok_or_else(|| Error::model_loading(format!("split index {idx} was never loaded")))?
            .as_mut()
            .ok_or(Error::UseAfterRelease { split: idx })
    }

    /// Allocate a new tensor group and return its id.
    pub fn new_group(&mut self, split_idx: u16, capacity: usize) -> usize {
        self.groups.push(TensorGroup {
            split_idx,
            capacity,
        });
        self.groups.len() - 1
    }

    /// Look up a previously allocated tensor group.
    pub fn group(&self, id: usize) -> Option<&TensorGroup> {
        self.groups.get(id)
    }
}

/// The loader facade consumed by the model-construction layer.
///
/// Opened once per model; all further calls happen on the opening thread.
/// Producer threads only ever touch the [`PromiseRegistry`] the load was
/// configured with.
#[derive(Debug)]
pub struct ModelLoader {
    state: LoaderState,
    splits: Option<IncrementalSplitLoader>,
    options: LoadOptions,
    ident: String,
    n_split: u16,
    completed: bool,
}

impl ModelLoader {
    /// Open a model from any [`LoadInput`] variant.
    pub fn open(input: LoadInput, options: LoadOptions) -> Result<Self> {
        match input {
            LoadInput::Path { path, splits } => Self::open_path(path, splits, options),
            LoadInput::Buffer { data } => Self::open_buffer(data, options),
            LoadInput::Future {
                key,
                context,
                splits,
                manifest_key,
                registry,
            } => Self::open_future(key, context, splits, manifest_key, registry, options),
        }
    }

    /// Open a model file, deriving sibling splits from the naming
    /// convention when the container declares more than one.
    pub fn from_file<P: AsRef<Path>>(path: P, options: LoadOptions) -> Result<Self> {
        Self::open(LoadInput::path(path.as_ref()), options)
    }

    /// Open a single-split model from an owned byte buffer.
    pub fn from_buffer(data: Vec<u8>, options: LoadOptions) -> Result<Self> {
        Self::open(LoadInput::buffer(data), options)
    }

    /// Open a split family whose buffers arrive through `registry`.
    ///
    /// `keys` lists every split's promise key in index order, base first;
    /// the manifest is pulled from `manifest_key` before anything else.
    pub fn from_split_futures(
        keys: &[String],
        context: &str,
        manifest_key: &str,
        registry: &PromiseRegistry,
        options: LoadOptions,
    ) -> Result<Self> {
        let key = keys
            .first()
            .cloned()
            .ok_or_else(|| Error::model_loading("no split keys provided"))?;
        Self::open(
            LoadInput::future(key, context, keys.to_vec(), manifest_key, registry),
            options,
        )
    }

    fn report(options: &LoadOptions, event: ProgressEvent) {
        if let Some(progress) = &options.progress {
            progress(event);
        }
    }

    fn open_buffer(data: Vec<u8>, options: LoadOptions) -> Result<Self> {
        Self::report(
            &options,
            ProgressEvent::LoadingModel {
                id: "buffer".to_string(),
            },
        );
        let container = SplitContainer::from_buffer(data)?;
        let n_split = container.split_count()?;
        if n_split > 1 {
            return Err(Error::model_loading(
                "buffer input cannot address sibling splits; use a future input for in-memory split loading",
            ));
        }
        let mut state = LoaderState::new();
        state.register_split(container, 0)?;

        let loader = Self {
            state,
            splits: None,
            options,
            ident: "buffer".to_string(),
            n_split: 1,
            completed: true,
        };
        loader.report_complete();
        Ok(loader)
    }

    fn open_path(path: PathBuf, splits: Vec<PathBuf>, options: LoadOptions) -> Result<Self> {
        let ident = path.to_string_lossy().into_owned();
        Self::report(&options, ProgressEvent::LoadingModel { id: ident.clone() });

        let container = SplitContainer::from_path(&path)?;
        let n_split = container.split_count()?;
        let mut state = LoaderState::new();

        if n_split <= 1 {
            state.register_split(container, 0)?;
            let loader = Self {
                state,
                splits: None,
                options,
                ident,
                n_split: 1,
                completed: true,
            };
            loader.report_complete();
            return Ok(loader);
        }

        let prefix = split_prefix(&ident).map(|(prefix, _, _)| prefix);
        let family: Vec<PathBuf> = if splits.is_empty() {
            let prefix = prefix.clone().ok_or_else(|| {
                Error::model_loading(format!("failed to derive split paths from {ident}"))
            })?;
            (0..n_split)
                .map(|idx| PathBuf::from(split_path(&prefix, idx, n_split)))
                .collect()
        } else {
            splits
        };
        if family.len() != n_split as usize {
            return Err(Error::model_loading(format!(
                "invalid split count: got {} split paths, container declares {n_split}",
                family.len()
            )));
        }

        state.register_split(container, 0)?;

        // The manifest decides between incremental and eager loading.
        let manifest_file = prefix.map(|p| manifest_path(&p));
        match manifest_file.filter(|p| Path::new(p).exists()) {
            Some(manifest_file) => {
                Self::report(
                    &options,
                    ProgressEvent::FetchingManifest {
                        key: manifest_file.clone(),
                    },
                );
                let expected = manifest::from_path(&manifest_file)?;
                let mut incremental = IncrementalSplitLoader::new(&mut state, expected)?;
                for idx in 1..n_split {
                    incremental.add_split(SplitDescriptor::new(
                        idx,
                        SplitOrigin::Path(family[idx as usize].clone()),
                        KV_SPLIT_NO,
                    ));
                }
                Ok(Self {
                    state,
                    splits: Some(incremental),
                    options,
                    ident,
                    n_split,
                    completed: false,
                })
            }
            None => {
                info!(model = %ident, splits = n_split, "no tensor manifest; loading all splits eagerly");
                for idx in 1..n_split {
                    Self::report(
                        &options,
                        ProgressEvent::LoadingSplit {
                            index: idx,
                            total: n_split,
                        },
                    );
                    let mut descriptor = SplitDescriptor::new(
                        idx,
                        SplitOrigin::Path(family[idx as usize].clone()),
                        KV_SPLIT_NO,
                    );
                    descriptor.load(&mut state)?;
                }
                let loader = Self {
                    state,
                    splits: None,
                    options,
                    ident,
                    n_split,
                    completed: true,
                };
                loader.report_complete();
                Ok(loader)
            }
        }
    }

    fn open_future(
        key: String,
        context: String,
        splits: Vec<String>,
        manifest_key: String,
        registry: PromiseRegistry,
        options: LoadOptions,
    ) -> Result<Self> {
        // The manifest is pulled before the base split: producers fulfill it
        // first, and the expected-tensor set must exist before any tensor
        // request.
        Self::report(
            &options,
            ProgressEvent::FetchingManifest {
                key: manifest_key.clone(),
            },
        );
        let expected = manifest::from_future(&registry, &manifest_key, &context)?;

        Self::report(&options, ProgressEvent::LoadingModel { id: key.clone() });
        let container = SplitContainer::from_future(&registry, &key, &context)?;
        let n_split = container.split_count()?;
        let mut state = LoaderState::new();
        state.register_split(container, 0)?;

        if n_split <= 1 {
            let loader = Self {
                state,
                splits: None,
                options,
                ident: key,
                n_split: 1,
                completed: true,
            };
            loader.report_complete();
            return Ok(loader);
        }

        let family: Vec<String> = if splits.is_empty() {
            let (prefix, _, count) = split_prefix(&key).ok_or_else(|| {
                Error::model_loading(format!("failed to derive split keys from {key}"))
            })?;
            if count != n_split {
                return Err(Error::model_loading(format!(
                    "split count mismatch: key names say {count}, container says {n_split}"
                )));
            }
            (0..n_split)
                .map(|idx| split_path(&prefix, idx, n_split))
                .collect()
        } else {
            splits
        };
        if family.len() != n_split as usize {
            return Err(Error::model_loading(format!(
                "invalid split count: got {} split keys, container declares {n_split}",
                family.len()
            )));
        }

        let mut incremental = IncrementalSplitLoader::new(&mut state, expected)?;
        for idx in 1..n_split {
            incremental.add_split(SplitDescriptor::new(
                idx,
                SplitOrigin::Future {
                    key: family[idx as usize].clone(),
                    context: context.clone(),
                    registry: registry.clone(),
                },
                KV_SPLIT_NO,
            ));
        }
        Ok(Self {
            state,
            splits: Some(incremental),
            options,
            ident: key,
            n_split,
            completed: false,
        })
    }

    fn report_complete(&self) {
        Self::report(
            &self.options,
            ProgressEvent::Complete {
                tensor_count: self.state.weights_map.len(),
                split_count: self.n_split,
            },
        );
    }

    /// Resolve tensor metadata by name, loading delayed splits on demand.
    ///
    /// With an incremental loader this marks the tensor consumed and may
    /// open further splits; without one the name is looked up directly.
    pub fn next_tensor_meta(&mut self, name: &str) -> Result<TensorMeta> {
        let split_idx = match self.splits.as_mut() {
            Some(incremental) => {
                let before = self.state.loaded_split_count();
                let split_idx = incremental.load_tensor_metadata(&mut self.state, name)?;
                if let Some(progress) = &self.options.progress {
                    for index in before..self.state.loaded_split_count() {
                        progress(ProgressEvent::LoadingSplit {
                            index: index as u16,
                            total: self.n_split,
                        });
                    }
                }
                if incremental.all_delayed_loaded() && !self.completed {
                    self.completed = true;
                    self.report_complete();
                }
                split_idx
            }
            None => {
                self.state
                    .weights_map
                    .get(name)
                    .ok_or_else(|| Error::unknown_tensor(name))?
                    .split_idx
            }
        };

        let weight = self
            .state
            .weights_map
            .get(name)
            .ok_or_else(|| Error::missing_weight(name))?;
        Ok(TensorMeta {
            name: name.to_string(),
            split_idx,
            dtype: weight.dtype,
            shape: weight.shape.clone(),
            offset: weight.offset,
            nbytes: weight.nbytes,
        })
    }

    /// Copy a tensor's data out of its hosting split.
    ///
    /// The bytes are owned by the caller, so the split can be released
    /// afterwards without invalidating them.
    pub fn read_tensor_data(&mut self, name: &str) -> Result<Vec<u8>> {
        let (split_idx, offset, nbytes) = {
            let weight = self
                .state
                .weights_map
                .get(name)
                .ok_or_else(|| Error::unknown_tensor(name))?;
            (weight.split_idx, weight.offset, weight.nbytes)
        };
        let source = self.state.source_for(split_idx)?;
        source.seek(SeekFrom::Start(offset))?;
        let mut data = vec![0u8; nbytes];
        source.read(&mut data)?;
        Ok(data)
    }

    /// Map a disk-backed split into memory. The mapping is independent of
    /// the split's source and survives [`release_split`](Self::release_split).
    pub fn mmap_split(&mut self, split_idx: u16) -> Result<Mmap> {
        self.state.source_for(split_idx)?.mmap()
    }

    /// Drop the byte source of a fully-consumed split. Idempotent;
    /// reading tensor data from the split afterwards fails.
    pub fn release_split(&mut self, split_idx: u16) -> Result<()> {
        match &self.splits {
            Some(incremental) => incremental.release_split(&mut self.state, split_idx)?,
            None => self.state.release_file(split_idx)?,
        }
        debug!(split = split_idx, "released split");
        Self::report(&self.options, ProgressEvent::SplitReleased { index: split_idx });
        Ok(())
    }

    /// Whether every tensor of a split has been consumed. Only meaningful
    /// for incremental loads.
    pub fn all_tensors_loaded(&self, split_idx: u16) -> Result<bool> {
        self.incremental()?.all_tensors_are_loaded(split_idx)
    }

    /// `(consumed, total)` tensor counts for a split of an incremental load.
    pub fn split_tensor_counts(&self, split_idx: u16) -> Result<(u32, u32)> {
        self.incremental()?.split_tensor_counts(split_idx)
    }

    /// Total tensor data bytes of a split of an incremental load.
    pub fn split_data_size(&self, split_idx: u16) -> Result<u64> {
        self.incremental()?.split_data_size(split_idx)
    }

    /// Allocation group for `(device, split_idx)` of an incremental load.
    pub fn ctx_for_split(&mut self, device: &Device, split_idx: u16) -> Result<usize> {
        let incremental = self
            .splits
            .as_mut()
            .ok_or_else(|| Error::model_loading("not an incremental split load"))?;
        incremental.ctx_for_split(&mut self.state, device, split_idx)
    }

    /// Look up a previously allocated tensor group.
    pub fn group(&self, id: usize) -> Option<&TensorGroup> {
        self.state.group(id)
    }

    /// Whether the upstream layer should skip `name`: true for single-split
    /// loads and for names the manifest does not list.
    pub fn tensor_ignored(&self, name: &str) -> bool {
        IncrementalSplitLoader::tensor_ignored(self.splits.as_ref(), name)
    }

    /// True when this load streams splits incrementally.
    pub fn is_incremental(&self) -> bool {
        self.splits.is_some()
    }

    /// Number of splits the container family declares.
    pub fn split_count(&self) -> u16 {
        self.n_split
    }

    /// Number of splits opened so far.
    pub fn loaded_split_count(&self) -> usize {
        self.state.loaded_split_count()
    }

    /// All tensor names known so far, sorted.
    pub fn tensor_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.weights_map.keys().cloned().collect();
        names.sort();
        names
    }

    /// Whether a tensor is known already (its split has been parsed).
    pub fn contains_tensor(&self, name: &str) -> bool {
        self.state.weights_map.contains_key(name)
    }

    /// Printable identity of the input this loader was opened from.
    pub fn identifier(&self) -> &str {
        &self.ident
    }

    fn incremental(&self) -> Result<&IncrementalSplitLoader> {
        self.splits
            .as_ref()
            .ok_or_else(|| Error::model_loading("not an incremental split load"))
    }
}
