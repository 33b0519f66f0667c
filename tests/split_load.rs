//! End-to-end split loading scenarios
//!
//! Exercises the loader facade over generated GGUF fixtures: single-file
//! disk loads, two-split disk loads driven by a manifest, future-backed
//! loads with eager and lazy producers, and the failure paths that must
//! abort a load.

use std::thread;
use std::time::{Duration, Instant};

use splitload::fixtures::{
    manifest_bytes, split_family_bytes, write_manifest, write_split_family, GgufBuilder,
};
use splitload::{
    Error, LoadOptions, ModelLoader, PromiseRegistry, KV_SPLIT_COUNT, KV_SPLIT_NO,
    KV_SPLIT_TENSORS_COUNT,
};
use tempfile::TempDir;

const CONTEXT: &str = "test-model-load";

/// Split 0 holds t1 (8 bytes) and t2 (16 bytes); split 1 holds t3 (32
/// bytes) and t4 (4 bytes).
fn two_split_groups() -> Vec<Vec<(&'static str, Vec<f32>)>> {
    vec![
        vec![("t1", vec![1.0, 2.0]), ("t2", vec![3.0; 4])],
        vec![("t3", vec![5.0; 8]), ("t4", vec![7.0])],
    ]
}

fn split_keys() -> Vec<String> {
    vec![
        "m-00001-of-00002.gguf".to_string(),
        "m-00002-of-00002.gguf".to_string(),
    ]
}

#[test]
fn single_file_disk_load() {
    let dir = TempDir::new().unwrap();
    let bytes = GgufBuilder::new()
        .tensor_f32("t1", &[1.0])
        .tensor_f32("t2", &[2.0, 2.5])
        .tensor_f32("t3", &[3.0])
        .build();
    let path = dir.path().join("model.gguf");
    std::fs::write(&path, bytes).unwrap();

    let mut loader = ModelLoader::from_file(&path, LoadOptions::new()).unwrap();
    assert!(!loader.is_incremental());
    assert_eq!(loader.split_count(), 1);

    for name in ["t1", "t2", "t3"] {
        assert_eq!(loader.next_tensor_meta(name).unwrap().split_idx, 0);
    }
    assert_eq!(loader.loaded_split_count(), 1);
    // storage is dropped with the facade
    drop(loader);
}

#[test]
fn two_split_disk_load_with_manifest() {
    let dir = TempDir::new().unwrap();
    let paths = write_split_family(dir.path(), "m", &two_split_groups());
    write_manifest(dir.path(), "m", &["t1", "t2", "t3", "t4"]);

    let mut loader = ModelLoader::from_file(&paths[0], LoadOptions::new()).unwrap();
    assert!(loader.is_incremental());
    assert_eq!(loader.split_count(), 2);
    assert_eq!(loader.loaded_split_count(), 1);

    // t1 sits in the already-parsed base split
    assert_eq!(loader.next_tensor_meta("t1").unwrap().split_idx, 0);
    assert_eq!(loader.loaded_split_count(), 1);

    // t3 sits in split 1: the delayed split loads on demand
    assert_eq!(loader.next_tensor_meta("t3").unwrap().split_idx, 1);
    assert_eq!(loader.loaded_split_count(), 2);

    assert_eq!(loader.next_tensor_meta("t2").unwrap().split_idx, 0);
    assert_eq!(loader.split_tensor_counts(0).unwrap(), (2, 2));
    assert!(loader.all_tensors_loaded(0).unwrap());

    assert_eq!(loader.next_tensor_meta("t4").unwrap().split_idx, 1);
    assert!(loader.all_tensors_loaded(1).unwrap());

    assert_eq!(loader.split_data_size(0).unwrap(), 24);
    assert_eq!(loader.split_data_size(1).unwrap(), 36);

    loader.release_split(1).unwrap();
    loader.release_split(0).unwrap();
    assert!(matches!(
        loader.read_tensor_data("t1"),
        Err(Error::UseAfterRelease { split: 0 })
    ));
}

#[test]
fn two_split_disk_load_without_manifest_is_eager() {
    let dir = TempDir::new().unwrap();
    let paths = write_split_family(dir.path(), "m", &two_split_groups());

    let mut loader = ModelLoader::from_file(&paths[0], LoadOptions::new()).unwrap();
    assert!(!loader.is_incremental());
    // without a manifest there is no incremental control: everything is
    // parsed at open
    assert_eq!(loader.loaded_split_count(), 2);
    assert_eq!(loader.next_tensor_meta("t4").unwrap().split_idx, 1);
    assert_eq!(loader.next_tensor_meta("t1").unwrap().split_idx, 0);
}

#[test]
fn two_split_future_load_with_eager_producer() {
    let registry = PromiseRegistry::new();
    let family = split_family_bytes(&two_split_groups());
    let keys = split_keys();

    // the producer runs to completion before the consumer starts
    assert!(registry.fulfill(
        "m.tensors.txt",
        CONTEXT,
        manifest_bytes(&["t1", "t2", "t3", "t4"])
    ));
    assert!(registry.fulfill(&keys[0], CONTEXT, family[0].clone()));
    assert!(registry.fulfill(&keys[1], CONTEXT, family[1].clone()));

    let mut loader = ModelLoader::from_split_futures(
        &keys,
        CONTEXT,
        "m.tensors.txt",
        &registry,
        LoadOptions::new(),
    )
    .unwrap();
    assert!(loader.is_incremental());
    assert_eq!(loader.loaded_split_count(), 1);

    assert_eq!(loader.next_tensor_meta("t3").unwrap().split_idx, 1);
    assert_eq!(loader.loaded_split_count(), 2);

    assert_eq!(loader.next_tensor_meta("t1").unwrap().split_idx, 0);
    assert_eq!(loader.next_tensor_meta("t2").unwrap().split_idx, 0);
    assert!(loader.all_tensors_loaded(0).unwrap());
    assert_eq!(loader.next_tensor_meta("t4").unwrap().split_idx, 1);
    assert!(loader.all_tensors_loaded(1).unwrap());

    assert_eq!(loader.split_data_size(0).unwrap(), 24);
    assert_eq!(loader.split_data_size(1).unwrap(), 36);
}

#[test]
fn two_split_future_load_with_lazy_producer() {
    let registry = PromiseRegistry::new();
    let family = split_family_bytes(&two_split_groups());
    let keys = split_keys();

    // only the manifest and the base split are available up front
    assert!(registry.fulfill(
        "m.tensors.txt",
        CONTEXT,
        manifest_bytes(&["t1", "t2", "t3", "t4"])
    ));
    assert!(registry.fulfill(&keys[0], CONTEXT, family[0].clone()));

    let mut loader = ModelLoader::from_split_futures(
        &keys,
        CONTEXT,
        "m.tensors.txt",
        &registry,
        LoadOptions::new(),
    )
    .unwrap();

    let producer = registry.clone();
    let late_key = keys[1].clone();
    let late_bytes = family[1].clone();
    let fulfiller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        assert!(producer.fulfill(&late_key, CONTEXT, late_bytes));
    });

    // the request for t3 blocks until the producer delivers split 1
    let start = Instant::now();
    assert_eq!(loader.next_tensor_meta("t3").unwrap().split_idx, 1);
    assert!(start.elapsed() >= Duration::from_millis(30));
    fulfiller.join().unwrap();

    let data = loader.read_tensor_data("t3").unwrap();
    assert_eq!(data.len(), 32);
    assert_eq!(
        f32::from_le_bytes([data[0], data[1], data[2], data[3]]),
        5.0
    );
}

#[test]
fn unknown_tensor_fails_without_loading_splits() {
    let dir = TempDir::new().unwrap();
    let paths = write_split_family(
        dir.path(),
        "m",
        &[vec![("t1", vec![1.0])], vec![("t2", vec![2.0])]],
    );
    write_manifest(dir.path(), "m", &["t1", "t2"]);

    let mut loader = ModelLoader::from_file(&paths[0], LoadOptions::new()).unwrap();
    let err = loader.next_tensor_meta("t3").unwrap_err();
    assert!(matches!(err, Error::UnknownTensor { .. }));
    // the rejected request must not have touched split 1
    assert_eq!(loader.loaded_split_count(), 1);

    // the loader state is intact and keeps serving valid requests
    assert_eq!(loader.next_tensor_meta("t1").unwrap().split_idx, 0);
    assert!(loader.tensor_ignored("t3"));
    assert!(!loader.tensor_ignored("t1"));
}

#[test]
fn split_index_mismatch_aborts_load() {
    let registry = PromiseRegistry::new();
    let keys = split_keys();

    let good = GgufBuilder::new()
        .kv_u16(KV_SPLIT_NO, 0)
        .kv_u16(KV_SPLIT_COUNT, 2)
        .kv_i32(KV_SPLIT_TENSORS_COUNT, 2)
        .tensor_f32("t1", &[1.0])
        .build();
    // the buffer fulfilled under split 1's key declares index 2
    let bad = GgufBuilder::new()
        .kv_u16(KV_SPLIT_NO, 2)
        .kv_u16(KV_SPLIT_COUNT, 2)
        .kv_i32(KV_SPLIT_TENSORS_COUNT, 2)
        .tensor_f32("t2", &[2.0])
        .build();

    assert!(registry.fulfill("m.tensors.txt", CONTEXT, manifest_bytes(&["t1", "t2"])));
    assert!(registry.fulfill(&keys[0], CONTEXT, good));
    assert!(registry.fulfill(&keys[1], CONTEXT, bad));

    let mut loader = ModelLoader::from_split_futures(
        &keys,
        CONTEXT,
        "m.tensors.txt",
        &registry,
        LoadOptions::new(),
    )
    .unwrap();

    let err = loader.next_tensor_meta("t2").unwrap_err();
    assert!(matches!(
        err,
        Error::SplitIndexMismatch {
            expected: 1,
            found: 2,
            ..
        }
    ));
    assert_eq!(loader.loaded_split_count(), 1);
}

#[test]
fn manifest_tensor_absent_from_every_split() {
    let dir = TempDir::new().unwrap();
    let paths = write_split_family(
        dir.path(),
        "m",
        &[vec![("t1", vec![1.0])], vec![("t2", vec![2.0])]],
    );
    write_manifest(dir.path(), "m", &["t1", "t2", "ghost"]);

    let mut loader = ModelLoader::from_file(&paths[0], LoadOptions::new()).unwrap();
    // the lookup exhausts every split before giving up on the count
    let err = loader.next_tensor_meta("ghost").unwrap_err();
    assert!(matches!(
        err,
        Error::TensorCountMismatch {
            expected: 3,
            found: 2
        }
    ));
    assert_eq!(loader.loaded_split_count(), 2);
}

#[test]
fn path_buffer_and_future_agree_on_single_split() {
    let dir = TempDir::new().unwrap();
    let bytes = GgufBuilder::new()
        .tensor_f32("t1", &[1.0, 2.0])
        .tensor_f32("t2", &[3.0; 5])
        .build();
    let path = dir.path().join("model.gguf");
    std::fs::write(&path, &bytes).unwrap();

    let registry = PromiseRegistry::new();
    assert!(registry.fulfill("model.gguf", CONTEXT, manifest_bytes(&["t1", "t2"])));
    // base split key doubles as the manifest's sibling here
    assert!(registry.fulfill("model.buffer.gguf", CONTEXT, bytes.clone()));

    let mut by_path = ModelLoader::from_file(&path, LoadOptions::new()).unwrap();
    let mut by_buffer = ModelLoader::from_buffer(bytes, LoadOptions::new()).unwrap();
    let keys = vec!["model.buffer.gguf".to_string()];
    let mut by_future = ModelLoader::from_split_futures(
        &keys,
        CONTEXT,
        "model.gguf",
        &registry,
        LoadOptions::new(),
    )
    .unwrap();

    assert_eq!(by_path.tensor_names(), by_buffer.tensor_names());
    assert_eq!(by_path.tensor_names(), by_future.tensor_names());
    for name in ["t1", "t2"] {
        let a = by_path.next_tensor_meta(name).unwrap();
        let b = by_buffer.next_tensor_meta(name).unwrap();
        let c = by_future.next_tensor_meta(name).unwrap();
        assert_eq!(a.split_idx, b.split_idx);
        assert_eq!(a.split_idx, c.split_idx);
        assert_eq!(a.nbytes, b.nbytes);
        assert_eq!(a.nbytes, c.nbytes);
        assert_eq!(
            by_path.read_tensor_data(name).unwrap(),
            by_future.read_tensor_data(name).unwrap()
        );
    }
}

#[test]
fn path_and_future_agree_on_two_splits() {
    let dir = TempDir::new().unwrap();
    let groups = two_split_groups();
    let paths = write_split_family(dir.path(), "m", &groups);
    write_manifest(dir.path(), "m", &["t1", "t2", "t3", "t4"]);

    let registry = PromiseRegistry::new();
    let family = split_family_bytes(&groups);
    let keys = split_keys();
    assert!(registry.fulfill(
        "m.tensors.txt",
        CONTEXT,
        manifest_bytes(&["t1", "t2", "t3", "t4"])
    ));
    assert!(registry.fulfill(&keys[0], CONTEXT, family[0].clone()));
    assert!(registry.fulfill(&keys[1], CONTEXT, family[1].clone()));

    let mut by_path = ModelLoader::from_file(&paths[0], LoadOptions::new()).unwrap();
    let mut by_future = ModelLoader::from_split_futures(
        &keys,
        CONTEXT,
        "m.tensors.txt",
        &registry,
        LoadOptions::new(),
    )
    .unwrap();

    for name in ["t1", "t2", "t3", "t4"] {
        let a = by_path.next_tensor_meta(name).unwrap();
        let b = by_future.next_tensor_meta(name).unwrap();
        assert_eq!(a.split_idx, b.split_idx, "split map differs for {name}");
        assert_eq!(a.nbytes, b.nbytes);
    }
    for split in 0..2 {
        assert_eq!(
            by_path.split_data_size(split).unwrap(),
            by_future.split_data_size(split).unwrap()
        );
    }
}

#[test]
fn ctx_groups_tensors_per_split_and_device() {
    let dir = TempDir::new().unwrap();
    let paths = write_split_family(dir.path(), "m", &two_split_groups());
    write_manifest(dir.path(), "m", &["t1", "t2", "t3", "t4"]);

    let mut loader = ModelLoader::from_file(&paths[0], LoadOptions::new()).unwrap();
    loader.next_tensor_meta("t3").unwrap();

    let device = candle_core::Device::Cpu;
    let g0 = loader.ctx_for_split(&device, 0).unwrap();
    let g1 = loader.ctx_for_split(&device, 1).unwrap();
    assert_ne!(g0, g1);
    // the same (device, split) pair reuses its group
    assert_eq!(loader.ctx_for_split(&device, 0).unwrap(), g0);

    assert_eq!(loader.group(g0).unwrap().capacity, 2);
    assert_eq!(loader.group(g0).unwrap().split_idx, 0);
}

#[test]
fn mmap_of_disk_split_survives_release() {
    let dir = TempDir::new().unwrap();
    let bytes = GgufBuilder::new().tensor_f32("t1", &[1.0]).build();
    let path = dir.path().join("model.gguf");
    std::fs::write(&path, bytes).unwrap();

    let mut loader = ModelLoader::from_file(&path, LoadOptions::new()).unwrap();
    let mmap = loader.mmap_split(0).unwrap();
    loader.release_split(0).unwrap();

    // the mapping outlives the released source
    assert_eq!(&mmap[0..4], b"GGUF");
}
