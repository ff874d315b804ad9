//! Reference tag generation for blob access control.
//!
//! A reference tag is a 64-bit keyed MAC over a blob id and a scope id
//! (session or transaction). Download requests must present the tag that was
//! handed out when the blob was materialized; without the process-local key,
//! forging a valid tag is infeasible.

use anyhow::{format_err, Error};
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private};
use openssl::sign::Signer;

/// Tag generator with a per-process random HMAC-SHA256 key.
///
/// The key is 128 bits. HMAC-SHA256 accepts longer keys (and RFC 2104
/// recommends keys at least as long as the hash output), but the 16-byte
/// length is constrained by existing deployments and a uniformly random
/// 128-bit secret is still ample for this use case.
///
/// The key only ever lives in this process: it is never persisted and never
/// logged, so tags are capabilities for a single process lifetime.
pub struct TagGenerator {
    key: PKey<Private>,
}

impl TagGenerator {
    /// Draws a fresh key from the OpenSSL CSPRNG. Failing to obtain random
    /// bytes is fatal.
    pub fn new() -> Result<Self, Error> {
        let mut secret = [0u8; 16];
        openssl::rand::rand_bytes(&mut secret)
            .map_err(|err| format_err!("unable to generate the reference tag secret - {}", err))?;
        let key = PKey::hmac(&secret)?;
        Ok(Self { key })
    }

    /// Computes the tag for `(blob_id, scope_id)`.
    ///
    /// Both ids are serialized little-endian into the 16-byte HMAC input and
    /// the first 8 digest bytes are read back little-endian. The byte order
    /// is an internal choice frozen for the process lifetime; tags never
    /// survive a restart, so it is not observable externally.
    pub fn compute(&self, blob_id: u64, scope_id: u64) -> u64 {
        let mut input = [0u8; 16];
        input[..8].copy_from_slice(&blob_id.to_le_bytes());
        input[8..].copy_from_slice(&scope_id.to_le_bytes());

        let mut signer = Signer::new(MessageDigest::sha256(), &self.key).unwrap();
        signer.update(&input).unwrap();
        let digest = signer.sign_to_vec().unwrap();

        u64::from_le_bytes(digest[..8].try_into().unwrap())
    }
}
