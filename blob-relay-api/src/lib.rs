//! Wire types and service stubs for the blob relay protocol.
//!
//! The message and service definitions live in `proto/`; the Rust modules
//! below are the committed prost/tonic output for them, so downstream crates
//! build without a protoc toolchain. Regenerate with `prost-build` /
//! `tonic-build` after editing the `.proto` sources.

/// Highest protocol revision this build understands. Requests declaring a
/// greater `api_version` are rejected with `Unavailable`.
pub const API_VERSION: u64 = 1;

/// Storage discriminator for blobs parked in the session scratch store.
pub const SESSION_STORAGE_ID: u64 = 0;

/// Storage discriminator for blobs promoted to the downstream (Limestone)
/// blob store.
pub const DOWNSTREAM_STORAGE_ID: u64 = 1;

#[allow(clippy::derive_partial_eq_without_eq)]
pub mod blobrelay {
    include!("blobrelay.rs");

    #[cfg(feature = "smoke-test")]
    pub mod smoke {
        include!("blobrelay.smoke.rs");
    }
}

/// Returns true when a client-declared API version can be served.
pub fn api_version_compatible(api_version: u64) -> bool {
    api_version <= API_VERSION
}

/// Human readable rejection text for an incompatible API version.
pub fn api_version_error_message(api_version: u64) -> String {
    format!(
        "the requested API version {} is not compatible with required version (less than or equal to {})",
        api_version, API_VERSION
    )
}
