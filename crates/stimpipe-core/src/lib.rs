#![forbid(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(missing_debug_implementations)]

//! Shared vocabulary of the stimpipe imaging pipeline: errors, feature flags,
//! window description and window-open configuration.

pub mod config;
pub mod error;
pub mod flags;
pub mod window;

pub use config::{load_pipeline_config_from, AnaglyphGains, PipelineConfig};
pub use error::{FboStatus, ImagingError};
pub use flags::{GfxCaps, ImagingMode, StereoMode, WindowPacking};
pub use window::{PixelRect, WindowInfo};
