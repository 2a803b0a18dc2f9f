//! depth-grayscale library crate.
//!
//! Converts float32 depth maps from depth-sensing cameras into single-channel
//! 8-bit grayscale images, using a bounded pool of reusable output buffers.
//! The capture side feeds frames in; the storage side takes images out.

pub mod cli;
pub mod config;
pub mod depth;
pub mod processing;
