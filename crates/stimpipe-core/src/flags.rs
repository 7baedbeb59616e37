use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Imaging pipeline feature bitmask (`imagingMode`).
    ///
    /// Values are stable: host code passes them around as plain integers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    #[serde(from = "u32", into = "u32")]
    pub struct ImagingMode: u32 {
        /// Any FBOs needed at all?
        const NEED_FAST_BACKING_STORE = 1;
        const NEED_IMAGE_PROCESSING = 2;
        const NEED_OUTPUT_CONVERSION = 4;
        /// Two independent output streams (native quad-buffered stereo).
        const NEED_SEPARATE_STREAMS = 8;
        /// Both views are merged into one framebuffer.
        const NEED_STEREO_MERGE = 16;
        const NEED_32BPC_FLOAT = 32;
        const NEED_16BPC_FLOAT = 64;
        const NEED_16BPC_FIXED = 128;
        /// Reserve one bounce buffer per processing stage.
        const NEED_DUAL_PASS = 256;
        /// Reserve two bounce buffers per processing stage.
        const NEED_MULTI_PASS = 512;
        const NEED_FAST_OFFSCREEN_WINDOWS = 1024;
        /// 32 bpc float after the draw stage; the draw stage too if the GPU can blend at 32 bpc.
        const USE_32BPC_FLOAT_ASAP = 4096;
        const NEED_DUAL_WINDOW_OUTPUT = 16384;
        const NEED_GPU_PANEL_FITTER = 32768;
        /// Bind the other view's image to texture unit 1 during per-eye processing.
        const NEED_OTHER_STREAM_INPUT = 1 << 17;
    }
}

bitflags! {
    /// Capability bits reported by a `GlDevice`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    #[serde(from = "u32", into = "u32")]
    pub struct GfxCaps: u32 {
        const FBO = 1;
        const RECTANGLE_TEXTURES = 1 << 1;
        const FLOAT_TEX_16 = 1 << 2;
        const FLOAT_TEX_32 = 1 << 3;
        const FLOAT_BLEND_16 = 1 << 4;
        const FLOAT_BLEND_32 = 1 << 5;
        const FLOAT_FILTER_16 = 1 << 6;
        const FLOAT_FILTER_32 = 1 << 7;
        const UNORM_TEX_16 = 1 << 8;
        const SNORM_TEX_16 = 1 << 9;
        const FBO_MULTISAMPLE = 1 << 10;
        const FBO_BLIT = 1 << 11;
        /// Multisample resolve and rescale in one framebuffer blit.
        const FBO_SCALED_RESOLVE_BLIT = 1 << 12;
        const MULTISAMPLE_TEXTURE = 1 << 13;
        const PACKED_DEPTH_STENCIL = 1 << 14;
        const NPOT_TEXTURES = 1 << 15;
        const NATIVE_STEREO = 1 << 16;
        const GLSL = 1 << 17;
        const GEOMETRY_SHADERS = 1 << 18;
        /// Retained geometry lists (display lists or an emulation of them).
        const GEOMETRY_LISTS = 1 << 19;
    }
}

bitflags! {
    /// Window packing flags that change the per-view drawable size.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    #[serde(from = "u32", into = "u32")]
    pub struct WindowPacking: u32 {
        const HALF_WIDTH = 2048;
        const HALF_HEIGHT = 8192;
        const TWICE_WIDTH = 65536;
    }
}

macro_rules! numeric_serde {
    ($($t:ty),*) => {$(
        impl From<u32> for $t {
            fn from(bits: u32) -> Self {
                <$t>::from_bits_retain(bits)
            }
        }

        impl From<$t> for u32 {
            fn from(flags: $t) -> u32 {
                flags.bits()
            }
        }
    )*};
}

numeric_serde!(ImagingMode, GfxCaps, WindowPacking);

/// Stereo presentation mode, numbered as host code expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StereoMode {
    #[default]
    Mono,
    /// Native quad-buffered OpenGL stereo.
    OpenGl,
    /// Vertically compressed views, left on top.
    CompressedTopLeftBottomRight,
    /// Vertically compressed views, right on top.
    CompressedTopRightBottomLeft,
    FreeFusion,
    FreeCrossFusion,
    AnaglyphRedGreen,
    AnaglyphGreenRed,
    AnaglyphRedBlue,
    AnaglyphBlueRed,
    /// Each view goes to its own onscreen window.
    DualWindow,
    /// Pipeline-driven frame-sequential presentation.
    FrameSequential,
}

impl StereoMode {
    pub const ALL: [StereoMode; 12] = [
        StereoMode::Mono,
        StereoMode::OpenGl,
        StereoMode::CompressedTopLeftBottomRight,
        StereoMode::CompressedTopRightBottomLeft,
        StereoMode::FreeFusion,
        StereoMode::FreeCrossFusion,
        StereoMode::AnaglyphRedGreen,
        StereoMode::AnaglyphGreenRed,
        StereoMode::AnaglyphRedBlue,
        StereoMode::AnaglyphBlueRed,
        StereoMode::DualWindow,
        StereoMode::FrameSequential,
    ];

    pub fn from_index(i: u32) -> Option<Self> {
        Self::ALL.get(i as usize).copied()
    }

    pub fn index(self) -> u32 {
        self as u32
    }

    pub fn is_stereo(self) -> bool {
        self != StereoMode::Mono
    }

    pub fn is_anaglyph(self) -> bool {
        matches!(
            self,
            StereoMode::AnaglyphRedGreen
                | StereoMode::AnaglyphGreenRed
                | StereoMode::AnaglyphRedBlue
                | StereoMode::AnaglyphBlueRed
        )
    }

    pub fn is_free_fusion(self) -> bool {
        matches!(self, StereoMode::FreeFusion | StereoMode::FreeCrossFusion)
    }

    pub fn is_compressed(self) -> bool {
        matches!(
            self,
            StereoMode::CompressedTopLeftBottomRight | StereoMode::CompressedTopRightBottomLeft
        )
    }

    /// Modes that composite both views into a single framebuffer.
    pub fn needs_merge(self) -> bool {
        self.is_anaglyph() || self.is_free_fusion() || self.is_compressed()
    }

    /// Modes that keep two output streams all the way to the finalized buffers.
    pub fn has_separate_streams(self) -> bool {
        matches!(
            self,
            StereoMode::OpenGl | StereoMode::DualWindow | StereoMode::FrameSequential
        )
    }

    /// Modes whose finalized buffers must be real per-eye FBOs.
    pub fn needs_finalized_fbos(self) -> bool {
        matches!(self, StereoMode::DualWindow | StereoMode::FrameSequential)
    }

    /// Default (left, right) RGB gains of an anaglyph mode.
    pub fn anaglyph_gains(self) -> Option<([f32; 3], [f32; 3])> {
        const RED: [f32; 3] = [1.0, 0.0, 0.0];
        const GREEN: [f32; 3] = [0.0, 1.0, 0.0];
        const BLUE: [f32; 3] = [0.0, 0.0, 1.0];
        match self {
            StereoMode::AnaglyphRedGreen => Some((RED, GREEN)),
            StereoMode::AnaglyphGreenRed => Some((GREEN, RED)),
            StereoMode::AnaglyphRedBlue => Some((RED, BLUE)),
            StereoMode::AnaglyphBlueRed => Some((BLUE, RED)),
            _ => None,
        }
    }
}
