//! Ports - Trait definitions for the pipeline's external collaborators.

pub mod source;
pub mod storage;
