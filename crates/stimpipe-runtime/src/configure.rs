//! Window-open configuration: negotiate precision and sampling with the
//! device, lay out the FBO table, and wire the default hook entries.

use stimpipe_core::{GfxCaps, ImagingError, ImagingMode, PipelineConfig, PixelRect, StereoMode, WindowInfo, WindowPacking};
use stimpipe_hooks::{HookChains, HookKind, HookPoint, InsertPosition};
use tracing::{info, warn};

use crate::device::{ColorFormat, GlDevice, TexTarget, Uniform};
use crate::fbo::{create_fbo, Fbo, FboRequest, FormatRequest};
use crate::shaders::{ShaderCache, ShaderPurpose};
use crate::table::{FboTable, SYSTEM_SLOT};

/// Luminance weights used by the anaglyph shader for gray conversion.
pub const COLOR_TO_GRAY_WEIGHTS: [f32; 3] = [0.3, 0.59, 0.11];

/// What [`configure_pipeline`] actually set up, after every downgrade.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineLayout {
    /// Effective imaging mode, including implied bits.
    pub mode: ImagingMode,
    pub draw_format: ColorFormat,
    /// Format of every stage after the draw stage.
    pub processing_format: ColorFormat,
    pub samples: u32,
    /// Client-visible framebuffer rect when the panel fitter is active.
    pub panel_fitter: Option<PixelRect>,
    /// Size of one view after packing and free-fusion halving.
    pub view_size: (i32, i32),
    /// Size of the draw buffers the user renders into.
    pub draw_size: (i32, i32),
    /// One message per soft capability shortfall that changed the setup.
    pub fallbacks: Vec<String>,
}

struct Negotiation<'c> {
    cfg: &'c PipelineConfig,
    fallbacks: Vec<String>,
}

impl Negotiation<'_> {
    fn fallback(&mut self, msg: &str) {
        if self.cfg.warns() {
            warn!("{msg}");
        }
        self.fallbacks.push(msg.to_string());
    }
}

/// Build the imaging pipeline of a freshly opened window.
///
/// `fbos` and `hooks` are filled in place. On error, whatever was already
/// allocated stays in `fbos` for the caller to destroy.
pub fn configure_pipeline<D: GlDevice>(
    dev: &mut D,
    info: &WindowInfo,
    cfg: &PipelineConfig,
    fbos: &mut FboTable,
    hooks: &mut HookChains,
    shaders: &mut ShaderCache,
) -> Result<PipelineLayout, ImagingError> {
    let caps = dev.caps();
    check_preconditions(caps, info)?;

    let mut neg = Negotiation {
        cfg,
        fallbacks: Vec::new(),
    };
    let mut mode = cfg.imaging_mode | ImagingMode::NEED_FAST_BACKING_STORE;
    if info.stereo.needs_merge() {
        mode |= ImagingMode::NEED_STEREO_MERGE;
    }
    if info.stereo.has_separate_streams() {
        mode |= ImagingMode::NEED_SEPARATE_STREAMS;
    }

    let (draw_format, processing_format) = resolve_formats(caps, mode, &mut neg)?;
    let (samples, panel_fitter) = resolve_sampling(caps, dev.max_samples(), &mut mode, &mut neg);

    let view_size = view_size(info);
    let draw_size = panel_fitter.map_or(view_size, |r| (r.w, r.h));
    let layout = PipelineLayout {
        mode,
        draw_format,
        processing_format,
        samples,
        panel_fitter,
        view_size,
        draw_size,
        fallbacks: neg.fallbacks,
    };

    build_table(dev, info, cfg, &layout, fbos)?;
    wire_default_hooks(dev, info, cfg, &layout, hooks, shaders)?;

    if cfg.informs() {
        info!(
            mode = layout.mode.bits(),
            draw = ?layout.draw_format,
            processing = ?layout.processing_format,
            samples = layout.samples,
            fbos = fbos.allocated(),
            "imaging pipeline configured"
        );
    }
    Ok(layout)
}

fn check_preconditions(caps: GfxCaps, info: &WindowInfo) -> Result<(), ImagingError> {
    if !caps.contains(GfxCaps::FBO) {
        return Err(ImagingError::MissingCapability("framebuffer objects".to_string()));
    }
    if !caps.contains(GfxCaps::RECTANGLE_TEXTURES) {
        return Err(ImagingError::MissingCapability("rectangle textures".to_string()));
    }
    if info.stereo == StereoMode::OpenGl && !caps.contains(GfxCaps::NATIVE_STEREO) {
        return Err(ImagingError::MissingCapability("native quad-buffered stereo".to_string()));
    }
    if !info.double_buffered {
        return Err(ImagingError::Precondition(
            "the imaging pipeline needs a double-buffered window".to_string(),
        ));
    }
    if info.legacy_emulation {
        return Err(ImagingError::Precondition(
            "the imaging pipeline is unavailable in legacy emulation mode".to_string(),
        ));
    }
    if info.width <= 0 || info.height <= 0 {
        return Err(ImagingError::Precondition(format!(
            "window has no drawable area ({}x{})",
            info.width, info.height
        )));
    }
    Ok(())
}

/// (draw stage, later stages) color formats for the requested precision.
fn resolve_formats(
    caps: GfxCaps,
    mode: ImagingMode,
    neg: &mut Negotiation<'_>,
) -> Result<(ColorFormat, ColorFormat), ImagingError> {
    if mode.contains(ImagingMode::NEED_32BPC_FLOAT) {
        if !caps.contains(GfxCaps::FLOAT_TEX_32) {
            return Err(ImagingError::MissingCapability("32 bpc float textures".to_string()));
        }
        return Ok((ColorFormat::Rgba32F, ColorFormat::Rgba32F));
    }

    if mode.contains(ImagingMode::USE_32BPC_FLOAT_ASAP) {
        if !caps.contains(GfxCaps::FLOAT_TEX_32) {
            return Err(ImagingError::MissingCapability("32 bpc float textures".to_string()));
        }
        if caps.contains(GfxCaps::FLOAT_BLEND_32) {
            return Ok((ColorFormat::Rgba32F, ColorFormat::Rgba32F));
        }
        if !caps.contains(GfxCaps::FLOAT_TEX_16) {
            return Err(ImagingError::MissingCapability(
                "16 bpc float textures for the draw stage".to_string(),
            ));
        }
        neg.fallback("no 32 bpc float blending: draw stage runs at 16 bpc float, later stages at 32 bpc");
        return Ok((ColorFormat::Rgba16F, ColorFormat::Rgba32F));
    }

    if mode.contains(ImagingMode::NEED_16BPC_FLOAT) {
        if !caps.contains(GfxCaps::FLOAT_TEX_16) {
            return Err(ImagingError::MissingCapability("16 bpc float textures".to_string()));
        }
        return Ok((ColorFormat::Rgba16F, ColorFormat::Rgba16F));
    }

    if mode.contains(ImagingMode::NEED_16BPC_FIXED) {
        if caps.contains(GfxCaps::UNORM_TEX_16) {
            return Ok((ColorFormat::Rgba16, ColorFormat::Rgba16));
        }
        if caps.contains(GfxCaps::SNORM_TEX_16) {
            neg.fallback("no 16 bpc unsigned normalized textures: using signed, 15 bits of effective precision");
            return Ok((ColorFormat::Rgba16Snorm, ColorFormat::Rgba16Snorm));
        }
        return Err(ImagingError::MissingCapability("16 bpc fixed point textures".to_string()));
    }

    Ok((ColorFormat::Rgba8, ColorFormat::Rgba8))
}

/// Effective multisample count and panel-fitter rect.
fn resolve_sampling(
    caps: GfxCaps,
    max_samples: u32,
    mode: &mut ImagingMode,
    neg: &mut Negotiation<'_>,
) -> (u32, Option<PixelRect>) {
    let mut samples = neg.cfg.multisample;
    let mut panel = None;

    if mode.contains(ImagingMode::NEED_GPU_PANEL_FITTER) {
        let client_rect = neg.cfg.client_rect;
        match client_rect {
            Some(r) if caps.contains(GfxCaps::FBO_BLIT) => panel = Some(r),
            Some(_) => neg.fallback("panel fitter needs framebuffer blits: disabled"),
            None => neg.fallback("panel fitter requested without a client rect: disabled"),
        }
        if panel.is_none() {
            mode.remove(ImagingMode::NEED_GPU_PANEL_FITTER);
        }
    }

    if samples > 0 && !caps.contains(GfxCaps::FBO_MULTISAMPLE | GfxCaps::FBO_BLIT) {
        neg.fallback("multisampled framebuffers unsupported: multisampling disabled");
        samples = 0;
    }
    if samples > 0 && panel.is_some() && !caps.contains(GfxCaps::FBO_SCALED_RESOLVE_BLIT) {
        neg.fallback("panel fitter cannot resolve and rescale in one blit: multisampling disabled");
        samples = 0;
    }
    if samples > max_samples {
        neg.fallback(&format!("multisample count {samples} clamped to device maximum {max_samples}"));
        samples = max_samples;
    }
    (samples, panel)
}

/// Per-view size after window packing and side-by-side halving.
fn view_size(info: &WindowInfo) -> (i32, i32) {
    let (mut w, mut h) = (info.width, info.height);
    if info.packing.contains(WindowPacking::HALF_WIDTH) {
        w /= 2;
    }
    if info.packing.contains(WindowPacking::TWICE_WIDTH) {
        w *= 2;
    }
    if info.packing.contains(WindowPacking::HALF_HEIGHT) {
        h /= 2;
    }
    if info.stereo.is_free_fusion() {
        w /= 2;
    }
    (w.max(1), h.max(1))
}

fn alloc<D: GlDevice>(
    dev: &mut D,
    fbos: &mut FboTable,
    req: FboRequest,
    stage: &str,
    warns: bool,
) -> Result<usize, ImagingError> {
    let fbo = create_fbo(dev, &req, stage, warns)?;
    Ok(fbos.push(fbo))
}

fn build_table<D: GlDevice>(
    dev: &mut D,
    info: &WindowInfo,
    cfg: &PipelineConfig,
    layout: &PipelineLayout,
    fbos: &mut FboTable,
) -> Result<(), ImagingError> {
    let warns = cfg.warns();
    let mode = layout.mode;
    let views = info.view_count();
    let (vw, vh) = layout.view_size;
    let (dw, dh) = layout.draw_size;
    let stereo = info.stereo;

    // Finalized: where each output stream ends up.
    if stereo.needs_finalized_fbos() || mode.contains(ImagingMode::NEED_DUAL_WINDOW_OUTPUT) {
        for eye in 0..2 {
            let req = FboRequest::color(ColorFormat::Rgba8, info.width, info.height);
            fbos.finalized[eye] = Some(alloc(dev, fbos, req, "finalized", warns)?);
        }
    } else {
        fbos.finalized[0] = Some(SYSTEM_SLOT);
        if stereo == StereoMode::OpenGl {
            fbos.finalized[1] = Some(SYSTEM_SLOT);
        }
    }

    // Draw: what the user renders into.
    for v in 0..views {
        let req = FboRequest::color(layout.draw_format, dw, dh)
            .with_depth_stencil(info.depth_stencil)
            .with_samples(layout.samples);
        fbos.draw[v] = Some(alloc(dev, fbos, req, "draw", warns)?);
    }

    // Input: resolved and rescaled, only needed if the draw buffer cannot be sampled as is.
    for v in 0..views {
        fbos.input[v] = if layout.samples > 0 || layout.panel_fitter.is_some() {
            let req = FboRequest::color(layout.draw_format, vw, vh);
            Some(alloc(dev, fbos, req, "input", warns)?)
        } else {
            fbos.draw[v]
        };
    }

    let processing = mode.contains(ImagingMode::NEED_IMAGE_PROCESSING);
    let bounces = mode.intersects(ImagingMode::NEED_DUAL_PASS | ImagingMode::NEED_MULTI_PASS);
    let multi = mode.contains(ImagingMode::NEED_MULTI_PASS);
    for v in 0..views {
        fbos.processed[v] = if processing {
            let req = FboRequest::color(layout.processing_format, vw, vh);
            Some(alloc(dev, fbos, req, "processed", warns)?)
        } else {
            fbos.input[v]
        };
    }
    if processing && bounces {
        let req = FboRequest::color(layout.processing_format, vw, vh);
        fbos.processed[2] = Some(alloc(dev, fbos, req, "image processing bounce", warns)?);
    }

    let conversion = mode.contains(ImagingMode::NEED_OUTPUT_CONVERSION);
    let merge = stereo.needs_merge();
    let (pw, ph) = if merge {
        if conversion {
            let req = FboRequest::color(layout.processing_format, info.width, info.height);
            fbos.pre_conversion[0] = Some(alloc(dev, fbos, req, "merged", warns)?);
        } else {
            fbos.pre_conversion[0] = fbos.finalized[0];
        }
        (info.width, info.height)
    } else {
        for v in 0..views {
            fbos.pre_conversion[v] = fbos.processed[v];
        }
        (vw, vh)
    };

    if (conversion || merge) && bounces {
        let req = FboRequest::color(layout.processing_format, pw, ph);
        let share = !cfg.bounce_share_excluded.contains(&stereo)
            && fbos.role(fbos.processed[2]).is_some_and(|b| fits(b, &req));
        fbos.pre_conversion[2] = if share {
            fbos.processed[2]
        } else {
            Some(alloc(dev, fbos, req, "output bounce", warns)?)
        };
    }
    if (conversion || merge) && multi {
        let req = FboRequest::color(layout.processing_format, pw, ph);
        fbos.pre_conversion[3] = Some(alloc(dev, fbos, req, "output bounce", warns)?);
    }
    Ok(())
}

/// Could `req` be served by the existing buffer `fbo`?
fn fits(fbo: &Fbo, req: &FboRequest) -> bool {
    let FormatRequest::Allocate(format) = req.format else {
        return false;
    };
    fbo.width == req.width
        && fbo.height == req.height
        && fbo.format == format
        && fbo.samples == req.samples
        && fbo.target == TexTarget::Rect
}

fn wire_default_hooks<D: GlDevice>(
    dev: &mut D,
    info: &WindowInfo,
    cfg: &PipelineConfig,
    layout: &PipelineLayout,
    hooks: &mut HookChains,
    shaders: &mut ShaderCache,
) -> Result<(), ImagingError> {
    hooks.add_entry(
        HookPoint::IdentityBlitChain,
        "Builtin:IdentityBlit",
        InsertPosition::Append,
        HookKind::builtin("IdentityBlit", "")?,
    );
    hooks.enable(HookPoint::IdentityBlitChain);

    let stereo = info.stereo;
    let (vw, vh) = layout.view_size;
    if stereo.is_anaglyph() {
        let (left, right) = match cfg.anaglyph_gains {
            Some(g) => (g.left, g.right),
            None => stereo.anaglyph_gains().unwrap_or(([1.0, 0.0, 0.0], [0.0, 0.0, 1.0])),
        };
        let program = shaders.get_or_build(dev, ShaderPurpose::Anaglyph, 4)?;
        dev.set_uniform(program, "Gains1", Uniform::Vec3(left));
        dev.set_uniform(program, "Gains2", Uniform::Vec3(right));
        dev.set_uniform(program, "ColorToGrayWeights", Uniform::Vec3(COLOR_TO_GRAY_WEIGHTS));
        hooks.add_entry(
            HookPoint::StereoCompositingBlit,
            "StereoCompositingShaderAnaglyph",
            InsertPosition::Append,
            HookKind::shader(program, "", 0)?,
        );
    } else if stereo.is_free_fusion() || stereo.is_compressed() {
        let left = shaders.get_or_build(dev, ShaderPurpose::StereoLeftView, 4)?;
        let right = shaders.get_or_build(dev, ShaderPurpose::StereoRightView, 4)?;
        let (left_cfg, right_cfg) = match stereo {
            StereoMode::FreeFusion => ("Offset:0:0".to_string(), format!("Offset:{vw}:0")),
            StereoMode::FreeCrossFusion => (format!("Offset:{vw}:0"), "Offset:0:0".to_string()),
            StereoMode::CompressedTopLeftBottomRight => (
                "Scaling:1:0.5".to_string(),
                format!("Offset:0:{} Scaling:1:0.5", vh / 2),
            ),
            _ => (
                format!("Offset:0:{} Scaling:1:0.5", vh / 2),
                "Scaling:1:0.5".to_string(),
            ),
        };
        hooks.add_entry(
            HookPoint::StereoCompositingBlit,
            "StereoCompositingShaderLeftView",
            InsertPosition::Append,
            HookKind::shader(left, &left_cfg, 0)?,
        );
        hooks.add_entry(
            HookPoint::StereoCompositingBlit,
            "StereoCompositingShaderRightView",
            InsertPosition::Append,
            HookKind::shader(right, &right_cfg, 0)?,
        );
    }
    if stereo.needs_merge() {
        hooks.enable(HookPoint::StereoCompositingBlit);
    }

    if stereo == StereoMode::OpenGl && cfg.stereo_sync_lines {
        for hook in [HookPoint::LeftFinalizerBlitChain, HookPoint::RightFinalizerBlitChain] {
            hooks.add_entry(
                hook,
                "Builtin:RenderStereoSyncLine",
                InsertPosition::Append,
                HookKind::builtin("RenderStereoSyncLine", "")?,
            );
            hooks.enable(hook);
        }
    }
    Ok(())
}
