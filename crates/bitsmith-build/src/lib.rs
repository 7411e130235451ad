//! # bitsmith-build
//!
//! The incremental build model and the project-level operations built on it.
//!
//! - [`StalenessModel`]: timestamp rules for every pipeline stage
//! - [`Builder`]: synthesis, implementation, bitstream, full builds and
//!   syntax checks against any [`bitsmith_tool::ToolExecutor`]
//! - IP and block-design management, including the GUI-driven create/edit flows
//! - Cleaning build products

pub mod bd;
mod builder;
mod clean;
pub mod ip;
mod staleness;

pub use builder::{Builder, BITSTREAM, CHECK, IMPLEMENTATION, SETUP, SYNTHESIS};
pub use clean::{clean, CleanTargets};
pub use staleness::{
    bd_should_regenerate, ip_should_regenerate, ip_should_resynthesise, is_stale, modified,
    BuildFlags, Stage, StalenessModel,
};
