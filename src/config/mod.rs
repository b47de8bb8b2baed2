//! Configuration module for BucketSync
//!
//! Provides CLI arguments, JSON profiles and the runtime options of a
//! sync call.

mod settings;

pub use settings::*;
