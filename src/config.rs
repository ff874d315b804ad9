use std::path::PathBuf;

use anyhow::Error;
use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

fn default_stream_chunk_size() -> usize {
    64 * 1024
}

/// Blob relay service configuration.
///
/// Usually deserialized from the embedder's configuration tree; all fields
/// except the scratch directory have defaults.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct RelayConfig {
    /// Whether the relay is active at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Scratch directory for in-flight uploads. Must exist and be writable;
    /// swept clean on startup.
    pub session_store: PathBuf,
    /// Maximum aggregate bytes reserved across all live sessions. 0 means
    /// unbounded.
    #[serde(default)]
    pub session_quota_size: u64,
    /// Register the same-host path-exchanging service.
    #[serde(default)]
    pub local_enabled: bool,
    /// Local uploads copy the client file into the scratch area instead of
    /// registering the client path in place.
    #[serde(default)]
    pub local_upload_copy_file: bool,
    /// Chunk size used when streaming blob contents back to clients.
    #[serde(default = "default_stream_chunk_size")]
    pub stream_chunk_size: usize,
    /// Accept the well-known mock tag on downloads. Development only.
    #[serde(default)]
    pub dev_accept_mock_tag: bool,
}

impl RelayConfig {
    /// Convenience constructor with default knobs, mainly for embedders that
    /// configure programmatically.
    pub fn new<P: Into<PathBuf>>(session_store: P) -> Self {
        Self {
            enabled: true,
            session_store: session_store.into(),
            session_quota_size: 0,
            local_enabled: false,
            local_upload_copy_file: false,
            stream_chunk_size: default_stream_chunk_size(),
            dev_accept_mock_tag: false,
        }
    }

    pub fn from_json(data: &str) -> Result<Self, Error> {
        Ok(serde_json::from_str(data)?)
    }
}
