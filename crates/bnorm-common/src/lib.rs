//! Common types, traits, and utilities for bnorm
//!
//! This crate provides the foundational types used across the bnorm
//! workspace: tensor descriptors and shared tensor handles, data type tags,
//! the error taxonomy, and the dispatch configuration.

pub mod config;
pub mod error;
pub mod tensor;
pub mod types;

pub use config::*;
pub use error::*;
pub use tensor::*;
pub use types::*;
