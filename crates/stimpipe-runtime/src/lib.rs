#![forbid(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(missing_debug_implementations)]

//! Backend-agnostic imaging pipeline runtime.
//!
//! Everything here talks to OpenGL through the [`GlDevice`] trait; the glow
//! backend lives in `stimpipe-runtime-glow`. Per window, [`ImagingWindow`]
//! owns the FBO table, the hook chains and the shader cache.

pub mod blitter;
pub mod builtins;
pub mod configure;
pub mod device;
pub mod executor;
pub mod fbo;
pub mod frame;
pub mod host;
pub mod shaders;
pub mod table;
pub mod texture;
pub mod window;

pub use stimpipe_core::{
    load_pipeline_config_from, FboStatus, GfxCaps, ImagingError, ImagingMode, PipelineConfig, PixelRect,
    StereoMode, WindowInfo, WindowPacking,
};

pub use blitter::{BlitPass, Blitter, DefaultBlitter};
pub use configure::{configure_pipeline, PipelineLayout};
pub use device::{
    Affine2, Attachment, BlendFactor, BlendState, ColorFormat, DepthFormat, DrawBuffer, Filter, GlDevice,
    StorageFormat, TexTarget, TexVertex, Uniform,
};
pub use executor::{plan_passes, ChainOptions, ChainTargets, Executor, RenderStateCache};
pub use fbo::{create_fbo, Fbo, FboRequest, FormatRequest};
pub use frame::FrameReport;
pub use host::{GammaState, GammaTable, HostRuntime, HostValue, NoHostRuntime};
pub use shaders::{build_program, ShaderCache, ShaderPurpose};
pub use table::{FboTable, SYSTEM_SLOT};
pub use texture::{
    create_shadow_fbo, normalize_texture_orientation, transform_texture, Orientation, PixelLayout,
    TextureRecord,
};
pub use window::{CommandReply, ImagingWindow, SlotTargets};
