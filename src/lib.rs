//! # OCR Checkpoint
//!
//! Save and resume support for OCR model training. A checkpoint is a
//! `<prefix>.pdparams` / `<prefix>.pdopt` / `<prefix>.states` triple holding
//! model parameters, optimizer state and training progress.
//!
//! ## Modules
//!
//! - [`checkpoint`]: Checkpoint manager: load, resume, warm start and save
//! - [`state`]: Ordered state dictionaries and their on-disk encoding
//! - [`model`]: Traits a model and optimizer implement to be checkpointed
//! - [`download`]: Resolving pretrained weight locations to local files
//! - [`config`]: TOML configuration loading and validation
//! - [`error`]: Structured error types

pub mod checkpoint;
pub mod config;
pub mod download;
pub mod error;
pub mod model;
pub mod state;
