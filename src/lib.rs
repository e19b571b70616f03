//! Vignette - Thumbnail generation worker
//!
//! Listens for "object uploaded" notifications, fetches each original
//! image, scales it to fit a bounding box and stores a JPEG derivative
//! next to it under a reserved path segment (`abc/photo.jpg` becomes
//! `abc/thumb/photo.jpg`).
//!
//! Hexagonal Architecture:
//! - domain/: Pure business logic (notifications, key derivation, transcoding, units of work)
//! - ports/: Trait definitions (object store, notification source)
//! - adapters/: Concrete implementations
//! - application/: Processor, dispatcher and worker loop
//! - config: Environment configuration
//!
//! # Features
//! - `aws`: S3 object store, SQS long-poll source, Lambda push source and both binaries
//! - `local`: Filesystem object store

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod logging;
pub mod ports;

// Re-exports for convenience
pub use application::dispatcher::{BatchReport, Dispatcher, UnitFailure};
pub use application::processor::UnitProcessor;
pub use application::worker::WorkerService;
pub use config::{PipelineConfig, PushConfig, QueueConfig};
pub use domain::keys::KeyDeriver;
pub use domain::notification::UploadNotification;
pub use domain::thumbnail::{ThumbnailPolicy, Transcoder};

#[cfg(feature = "local")]
pub use adapters::local::FsStore;
