//! # sgdl
//!
//! `sgdl` downloads a single remote file over N concurrent HTTP range
//! requests and reassembles the pieces into one output file. It supports:
//! - Segmented (multi-connection) downloading
//! - Cooperative pause, resume and cancellation mid-transfer
//! - Live progress: bytes, instantaneous speed, elapsed time, average speed
//! - Rate limiting (throttling)
//!
//! The engine is UI-agnostic: callers start [`Downloader::run`], poll
//! [`ProgressAggregator::sample`] for display, and drive the shared
//! [`ControlSignal`] to pause, resume or cancel. The `sgdl` binary wires
//! these to a terminal progress bar and Unix signals.

pub mod cli;
pub mod control;
pub mod daemon;
pub mod downloader;
pub mod error;
pub mod progress;
pub mod state;
pub mod utils;

pub use control::ControlSignal;
pub use downloader::Downloader;
pub use error::DownloadError;
pub use progress::{ProgressAggregator, ProgressSnapshot};
pub use state::{plan_segments, DownloadJob, Segment, SegmentOutcome};
