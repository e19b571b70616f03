//! Local adapters for running the pipeline against a directory tree.

pub mod fs;

pub use fs::FsStore;
