//! Startup behavior: the relay must refuse to come up degraded and must
//! reclaim the scratch directory before serving.

use std::path::PathBuf;
use std::sync::Arc;

use blob_relay::{BlobRelay, DatastoreAdapter, RelayConfig};

struct NullAdapter;

impl DatastoreAdapter for NullAdapter {
    fn lookup_tag(&self, _blob_id: u64, _scope_id: u64) -> u64 {
        0
    }

    fn lookup_path(&self, _blob_id: u64) -> PathBuf {
        PathBuf::new()
    }
}

fn test_dir(name: &str) -> PathBuf {
    let mut path = std::fs::canonicalize(".").unwrap();
    path.push(format!(".testdir-startup-{}", name));
    let _ = std::fs::remove_dir_all(&path);
    std::fs::create_dir_all(&path).unwrap();
    path
}

#[test]
fn refuses_missing_store_directory() {
    let path = test_dir("missing");
    std::fs::remove_dir_all(&path).unwrap();

    let config = RelayConfig::new(&path);
    assert!(BlobRelay::new(Arc::new(NullAdapter), config).is_err());
}

#[test]
fn refuses_zero_chunk_size() {
    let path = test_dir("chunk-size");

    let mut config = RelayConfig::new(&path);
    config.stream_chunk_size = 0;
    assert!(BlobRelay::new(Arc::new(NullAdapter), config).is_err());

    std::fs::remove_dir_all(&path).unwrap();
}

#[test]
fn sweeps_leftover_scratch_files() {
    let path = test_dir("sweep");
    std::fs::write(path.join("upload_17"), b"left over from a crash").unwrap();
    std::fs::create_dir(path.join("junk")).unwrap();
    std::fs::write(path.join("junk").join("nested"), b"more").unwrap();

    let relay = BlobRelay::new(Arc::new(NullAdapter), RelayConfig::new(&path)).unwrap();
    assert_eq!(std::fs::read_dir(&path).unwrap().count(), 0);
    assert_eq!(relay.session_manager().store().current_size(), 0);

    std::fs::remove_dir_all(&path).unwrap();
}
