//! Utility modules shared across pipeline stages

pub mod filters;

pub use filters::{reflect_101, sharpen_rgb};
