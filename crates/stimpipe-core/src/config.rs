use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ImagingError;
use crate::flags::{ImagingMode, StereoMode};
use crate::window::PixelRect;

/// Per-channel gains of the two anaglyph views.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnaglyphGains {
    pub left: [f32; 3],
    pub right: [f32; 3],
}

/// Window-open configuration of the imaging pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub imaging_mode: ImagingMode,
    /// Requested multisample count, 0 = off.
    pub multisample: u32,
    /// 0 = silent, 1 = errors, 2 = warnings, 3 = info, >5 = per-frame tracing.
    pub verbosity: u8,
    /// Virtual framebuffer size seen by client code when the panel fitter is active.
    pub client_rect: Option<PixelRect>,
    pub anaglyph_gains: Option<AnaglyphGains>,
    /// Stereo modes where the image-processing bounce buffer must not be shared
    /// with the output-formatting stage, even when sizes match.
    pub bounce_share_excluded: Vec<StereoMode>,
    /// Draw blue-line sync markers into both views of native stereo windows.
    pub stereo_sync_lines: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            imaging_mode: ImagingMode::empty(),
            multisample: 0,
            verbosity: 3,
            client_rect: None,
            anaglyph_gains: None,
            bounce_share_excluded: vec![StereoMode::FreeFusion, StereoMode::FreeCrossFusion],
            stereo_sync_lines: false,
        }
    }
}

impl PipelineConfig {
    pub fn with_mode(imaging_mode: ImagingMode) -> Self {
        Self {
            imaging_mode,
            ..Self::default()
        }
    }

    pub fn warns(&self) -> bool {
        self.verbosity > 1
    }

    pub fn informs(&self) -> bool {
        self.verbosity > 2
    }

    pub fn traces_frames(&self) -> bool {
        self.verbosity > 5
    }

    pub fn validate(&self, path: &Path) -> Result<(), ImagingError> {
        if self.verbosity > 10 {
            return Err(ImagingError::InvalidConfig {
                path: path.to_path_buf(),
                msg: format!("verbosity {} out of range 0..=10", self.verbosity),
            });
        }
        if let Some(r) = self.client_rect {
            if r.is_empty() {
                return Err(ImagingError::InvalidConfig {
                    path: path.to_path_buf(),
                    msg: "client_rect must have a positive size".to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn from_json_str(path: &Path, s: &str) -> Result<Self, ImagingError> {
        let cfg: PipelineConfig = serde_json::from_str(s).map_err(|source| ImagingError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        cfg.validate(path)?;
        Ok(cfg)
    }
}

/// Load and validate a pipeline configuration from a JSON file.
pub fn load_pipeline_config_from(path: impl AsRef<Path>) -> Result<PipelineConfig, ImagingError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| ImagingError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    PipelineConfig::from_json_str(path, &text)
}
