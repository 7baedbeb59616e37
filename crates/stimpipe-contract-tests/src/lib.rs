#![forbid(unsafe_code)]

//! Contract tests of the imaging pipeline, run against [`RecordingDevice`].

pub mod recording;

pub use recording::{Call, Draw, DrawKind, RecordingDevice};

#[cfg(test)]
mod config_fixtures;
#[cfg(test)]
mod lifecycle;
#[cfg(test)]
mod properties;
#[cfg(test)]
mod scenarios;
