//! Services separating I/O, format rules and progress reporting from the
//! pipeline stages

pub mod format;
pub mod io;
pub mod progress;

pub use format::OutputFormatHandler;
pub use io::ImageIOService;
pub use progress::{
    NoOpProgressReporter, ProgressReporter, ProgressTracker, ProgressUpdate,
    TracingProgressReporter,
};
