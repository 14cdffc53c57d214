//! NMR spectrum processing core.
//!
//! Raw buffers go through a replayable filter pipeline (`pipeline`), features
//! are extracted from the processed data (`analysis`) and linked to molecule
//! atoms (`assignment`). Stored documents are migrated and loaded by `data`.

pub mod analysis;
pub mod assignment;
pub mod config;
pub mod data;
pub mod log;
pub mod pipeline;
pub mod view;
