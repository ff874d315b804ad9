//! Blob relay service.
//!
//! A gRPC staging layer mediating large binary payloads between clients and
//! a downstream datastore. Clients upload bytes into a server-owned scratch
//! area for a later transaction commit, or download bytes referenced by a
//! previously materialized blob, either still in the scratch area or already
//! promoted to the datastore's permanent blob store.
//!
//! The embedder supplies a [`DatastoreAdapter`] for the two datastore
//! resolutions the relay needs, builds a [`BlobRelay`] from a
//! [`RelayConfig`], and registers the produced tonic services on its own
//! gRPC server:
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use std::path::PathBuf;
//! # struct Downstream;
//! # impl blob_relay::DatastoreAdapter for Downstream {
//! #     fn lookup_tag(&self, _: u64, _: u64) -> u64 { 0 }
//! #     fn lookup_path(&self, _: u64) -> PathBuf { PathBuf::new() }
//! # }
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = blob_relay::RelayConfig::new("/var/lib/relay/session");
//! let relay = blob_relay::BlobRelay::new(Arc::new(Downstream), config)?;
//!
//! tonic::transport::Server::builder()
//!     .add_service(relay.streaming_service())
//!     .add_optional_service(relay.local_service())
//!     .serve("[::1]:50051".parse()?)
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! Sessions and their scratch files are ephemeral: the scratch directory is
//! swept on startup and nothing survives a restart, including the reference
//! tags gating downloads.

pub mod api;
pub mod config;
pub mod datastore;
pub mod error;
pub mod manager;
pub mod session;
pub mod store;
pub mod tag;

pub use api::BlobRelay;
pub use config::RelayConfig;
pub use datastore::DatastoreAdapter;
pub use error::RelayError;
pub use manager::SessionManager;
pub use session::BlobSession;
pub use store::SessionStore;
pub use tag::TagGenerator;
