//! splitload - incremental multi-source split loading for GGUF models
//!
//! This crate loads container-format models that are serialized as one or
//! more binary splits, and streams their tensor metadata to a
//! model-construction layer. The bytes of a split can come from three
//! provenances behind one positional byte-stream contract:
//!
//! - **Disk**: a model file, with sibling splits found through the
//!   `<base>-NNNNN-of-MMMMM.gguf` naming convention
//! - **Buffer**: an owned byte buffer presented once
//! - **Future**: byte buffers delivered asynchronously by a producer thread
//!   through a keyed [`PromiseRegistry`]
//!
//! Multi-split models are loaded **incrementally** when a tensor manifest
//! (`<base>.tensors.txt`) is available: later splits are opened only when a
//! requested tensor turns out to live in them, and a split is released as
//! soon as all of its tensors have been consumed.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use splitload::{LoadOptions, ModelLoader};
//!
//! let mut loader = ModelLoader::from_file("./models/llama-00001-of-00002.gguf", LoadOptions::new())?;
//! let meta = loader.next_tensor_meta("model.embed_tokens.weight")?;
//! let data = loader.read_tensor_data("model.embed_tokens.weight")?;
//! println!("{} bytes in split {}", data.len(), meta.split_idx);
//! # Ok::<(), splitload::Error>(())
//! ```
//!
//! # Loading from promised buffers
//!
//! A producer thread delivers the manifest first and then each split, in any
//! rhythm it likes; the loading thread blocks only when it needs a buffer
//! that has not arrived yet:
//!
//! ```rust,no_run
//! use splitload::{LoadOptions, ModelLoader, PromiseRegistry};
//!
//! let registry = PromiseRegistry::new();
//! let keys = vec![
//!     "m-00001-of-00002.gguf".to_string(),
//!     "m-00002-of-00002.gguf".to_string(),
//! ];
//!
//! let producer = registry.clone();
//! std::thread::spawn(move || {
//!     producer.fulfill("m.tensors.txt", "load-1", std::fs::read("m.tensors.txt").unwrap());
//!     producer.fulfill("m-00001-of-00002.gguf", "load-1", std::fs::read("m-00001-of-00002.gguf").unwrap());
//!     producer.fulfill("m-00002-of-00002.gguf", "load-1", std::fs::read("m-00002-of-00002.gguf").unwrap());
//! });
//!
//! let loader = ModelLoader::from_split_futures(&keys, "load-1", "m.tensors.txt", &registry, LoadOptions::new())?;
//! # Ok::<(), splitload::Error>(())
//! ```

#![doc(html_root_url = "https://docs.rs/splitload/")]
#![warn(missing_docs)]

// Public modules
pub mod byte_source;
pub mod container;
pub mod error;
pub mod fixtures;
pub mod future_source;
pub mod incremental;
pub mod load_input;
pub mod loader;
pub mod manifest;
pub mod progress;
pub mod promise;
pub mod split;

// Re-export commonly used types
pub use byte_source::{BufferSource, ByteSource, DiskSource};
pub use container::{SplitContainer, KV_SPLIT_COUNT, KV_SPLIT_NO, KV_SPLIT_TENSORS_COUNT};
pub use error::{Error, Result};
pub use future_source::FutureByteSource;
pub use incremental::IncrementalSplitLoader;
pub use load_input::{manifest_path, split_path, split_prefix, LoadInput};
pub use loader::{LoadOptions, LoaderState, ModelLoader, TensorGroup, TensorMeta, TensorWeight};
pub use promise::{PromiseHandle, PromiseRegistry};
pub use split::{SplitDescriptor, SplitOrigin};

pub use progress::{
    custom_progress, default_progress, progress_bar, silent_progress, ProgressEvent, ProgressFn,
};
