use serde::{Deserialize, Serialize};

use crate::flags::{StereoMode, WindowPacking};

/// Integer pixel rectangle, origin at the top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct PixelRect {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

impl PixelRect {
    pub fn new(x: i32, y: i32, w: i32, h: i32) -> Self {
        Self { x, y, w, h }
    }

    pub fn sized(w: i32, h: i32) -> Self {
        Self { x: 0, y: 0, w, h }
    }

    pub fn is_empty(&self) -> bool {
        self.w <= 0 || self.h <= 0
    }
}

/// What the imaging pipeline needs to know about the onscreen window it serves.
///
/// The windowing layer fills this in after the GL context exists; the pipeline
/// never creates windows or contexts itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowInfo {
    pub width: i32,
    pub height: i32,
    #[serde(default)]
    pub stereo: StereoMode,
    #[serde(default)]
    pub packing: WindowPacking,
    #[serde(default = "default_true")]
    pub double_buffered: bool,
    /// Legacy-emulation contexts cannot host the pipeline.
    #[serde(default)]
    pub legacy_emulation: bool,
    /// Draw buffers get depth and stencil attachments.
    #[serde(default = "default_true")]
    pub depth_stencil: bool,
}

fn default_true() -> bool {
    true
}

impl WindowInfo {
    pub fn new(width: i32, height: i32) -> Self {
        Self {
            width,
            height,
            stereo: StereoMode::Mono,
            packing: WindowPacking::empty(),
            double_buffered: true,
            legacy_emulation: false,
            depth_stencil: true,
        }
    }

    pub fn with_stereo(mut self, stereo: StereoMode) -> Self {
        self.stereo = stereo;
        self
    }

    pub fn rect(&self) -> PixelRect {
        PixelRect::sized(self.width, self.height)
    }

    /// Number of views the user renders into.
    pub fn view_count(&self) -> usize {
        if self.stereo.is_stereo() {
            2
        } else {
            1
        }
    }
}
