//! Command-line front-end
//!
//! Only available with the `cli` feature.

mod config;
#[path = "main.rs"]
mod main_impl;

pub use main_impl::{main, Cli, CliGradientBlend, CliIntensity, CliOutputFormat};
