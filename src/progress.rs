//! Progress reporting utilities for model loading operations
//!
//! This module provides progress callback functionality for long-running
//! split loads, allowing users to track manifest fetches, per-split loading
//! and release as the model layer streams tensors.

/// Progress callback function type
pub type ProgressFn = Box<dyn Fn(ProgressEvent) + Send + Sync>;

/// Events reported during model loading operations
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// Opening the base split of a model
    LoadingModel {
        /// Path, promise key or the `"buffer"` sentinel
        id: String,
    },

    /// Fetching the tensor-name manifest
    FetchingManifest {
        /// Manifest path or promise key
        key: String,
    },

    /// Loading one split of a family
    LoadingSplit {
        /// 0-based split index
        index: u16,
        /// Total number of splits
        total: u16,
    },

    /// A fully-consumed split's storage was dropped
    SplitReleased {
        /// 0-based split index
        index: u16,
    },

    /// Every split the load will touch has been parsed
    Complete {
        /// Number of tensors registered
        tensor_count: usize,
        /// Number of splits in the family
        split_count: u16,
    },
}

impl ProgressEvent {
    /// Get a human-readable description of this event
    pub fn description(&self) -> String {
        match self {
            ProgressEvent::LoadingModel { id } => format!("Loading model from {id}"),
            ProgressEvent::FetchingManifest { key } => format!("Fetching tensor manifest {key}"),
            ProgressEvent::LoadingSplit { index, total } => {
                format!("Loading split [{}/{}]", index + 1, total)
            }
            ProgressEvent::SplitReleased { index } => format!("Released split {index}"),
            ProgressEvent::Complete {
                tensor_count,
                split_count,
            } => {
                format!("✓ {tensor_count} tensors registered across {split_count} split(s)")
            }
        }
    }

    /// Check if this is a completion event
    pub fn is_complete(&self) -> bool {
        matches!(self, ProgressEvent::Complete { .. })
    }
}

/// Default progress reporter that prints to stdout
pub fn default_progress() -> ProgressFn {
    Box::new(|event: ProgressEvent| {
        let description = event.description();
        if event.is_complete() {
            println!("{description}");
        } else {
            println!("📦 {description}");
        }
    })
}

/// Silent progress reporter (no-op)
///
/// Use this when you don't want any progress output.
pub fn silent_progress() -> ProgressFn {
    Box::new(|_event: ProgressEvent| {
        // Do nothing
    })
}

/// Create a custom progress reporter from a closure
pub fn custom_progress<F>(f: F) -> ProgressFn
where
    F: Fn(ProgressEvent) + Send + Sync + 'static,
{
    Box::new(f)
}

#[cfg(feature = "progress")]
/// Progress reporter with a visual progress bar
///
/// Uses the `indicatif` crate to show a progress bar over split loading.
pub fn progress_bar() -> ProgressFn {
    use indicatif::{ProgressBar, ProgressStyle};
    use std::sync::{Arc, Mutex};

    let pb = Arc::new(Mutex::new(None::<ProgressBar>));

    Box::new(move |event: ProgressEvent| {
        let mut pb_guard = pb.lock().unwrap();

        match event {
            ProgressEvent::LoadingSplit { index, total } => {
                if pb_guard.is_none() {
                    let new_pb = ProgressBar::new(total as u64);
                    new_pb.set_style(
                        ProgressStyle::default_bar()
                            .template("📦 Loading splits [{bar:40.cyan/blue}] {pos}/{len}")
                            .unwrap()
                            .progress_chars("█▉▊▋▌▍▎▏ "),
                    );
                    *pb_guard = Some(new_pb);
                }
                if let Some(ref pb) = *pb_guard {
                    pb.set_position(index as u64 + 1);
                }
            }
            ProgressEvent::Complete { .. } => {
                if let Some(ref pb) = *pb_guard {
                    pb.finish_with_message("✓ Complete");
                }
                *pb_guard = None;
                println!("{}", event.description());
            }
            _ => {
                println!("📦 {}", event.description());
            }
        }
    })
}

#[cfg(not(feature = "progress"))]
/// Progress reporter with a visual progress bar (fallback when indicatif not available)
pub fn progress_bar() -> ProgressFn {
    // Fallback to default progress when indicatif feature is not enabled
    default_progress()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_progress_event_descriptions() {
        let event = ProgressEvent::LoadingModel {
            id: "models/llama-00001-of-00002.gguf".to_string(),
        };
        assert_eq!(
            event.description(),
            "Loading model from models/llama-00001-of-00002.gguf"
        );

        let event = ProgressEvent::LoadingSplit { index: 1, total: 4 };
        assert_eq!(event.description(), "Loading split [2/4]");

        let event = ProgressEvent::Complete {
            tensor_count: 291,
            split_count: 3,
        };
        assert_eq!(
            event.description(),
            "✓ 291 tensors registered across 3 split(s)"
        );
        assert!(event.is_complete());
    }

    #[test]
    fn test_custom_progress() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let events_clone = events.clone();

        let progress_fn = custom_progress(move |event: ProgressEvent| {
            events_clone.lock().unwrap().push(event);
        });

        progress_fn(ProgressEvent::FetchingManifest {
            key: "m.tensors.txt".to_string(),
        });
        progress_fn(ProgressEvent::Complete {
            tensor_count: 4,
            split_count: 2,
        });

        let captured_events = events.lock().unwrap();
        assert_eq!(captured_events.len(), 2);
        assert!(matches!(
            captured_events[0],
            ProgressEvent::FetchingManifest { .. }
        ));
        assert!(matches!(captured_events[1], ProgressEvent::Complete { .. }));
    }
}
