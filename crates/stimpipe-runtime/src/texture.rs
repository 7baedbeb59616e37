//! Textures of foreign origin: shadow FBOs, orientation normalization and
//! offline transforms through the `UserDefinedBlit` chain.

use stimpipe_core::{ImagingError, ImagingMode};
use stimpipe_hooks::HookPoint;
use tracing::debug;

use crate::device::{ColorFormat, GlDevice, TexTarget, TexVertex, Uniform};
use crate::executor::{ChainOptions, ChainTargets, Executor, RenderStateCache};
use crate::fbo::{create_fbo, Fbo, FboRequest, FormatRequest};
use crate::shaders::{ShaderCache, ShaderPurpose};

/// How the stored pixels relate to the upright image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Orientation {
    #[default]
    Upright,
    /// Rows stored top to bottom instead of bottom to top.
    FlippedVertical,
    /// Rows and columns swapped; the stored texture is `height x width`.
    Transposed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelLayout {
    /// Pixel-interleaved with this many channels.
    Interleaved(u8),
    /// Single-channel planes stacked vertically, one per channel.
    Planar(u8),
    /// I420 video: Y plane, then U and V planes at half resolution.
    Yuv420,
    /// 8-bit luma packed four pixels per RGBA texel.
    PackedLuma8,
}

impl Default for PixelLayout {
    fn default() -> Self {
        PixelLayout::Interleaved(4)
    }
}

/// A texture the pipeline may read from or render into.
#[derive(Debug, Clone, PartialEq)]
pub struct TextureRecord {
    pub texture: u32,
    pub target: TexTarget,
    pub format: ColorFormat,
    /// Logical (upright) image size.
    pub width: i32,
    pub height: i32,
    pub orientation: Orientation,
    pub layout: PixelLayout,
    /// FBO wrapping the texture, created on demand.
    pub shadow: Option<Fbo>,
}

impl TextureRecord {
    pub fn new(texture: u32, target: TexTarget, format: ColorFormat, width: i32, height: i32) -> Self {
        Self {
            texture,
            target,
            format,
            width,
            height,
            orientation: Orientation::Upright,
            layout: PixelLayout::default(),
            shadow: None,
        }
    }

    pub fn with_orientation(mut self, orientation: Orientation) -> Self {
        self.orientation = orientation;
        self
    }

    pub fn with_layout(mut self, layout: PixelLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Upright and pixel-interleaved: usable by the pipeline as is.
    pub fn is_normalized(&self) -> bool {
        self.orientation == Orientation::Upright && matches!(self.layout, PixelLayout::Interleaved(4))
    }

    /// Free the shadow FBO. The texture itself is left alone.
    pub fn release_shadow<D: GlDevice>(&mut self, dev: &mut D) {
        if let Some(mut fbo) = self.shadow.take() {
            fbo.destroy(dev);
        }
    }
}

/// Give `tex` a shadow FBO. With `as_render_target` the FBO is real and
/// renders into the texture; otherwise a skeleton record is enough and gets
/// upgraded on a later call that needs a render target.
pub fn create_shadow_fbo<D: GlDevice>(
    dev: &mut D,
    tex: &mut TextureRecord,
    as_render_target: bool,
    warns: bool,
) -> Result<(), ImagingError> {
    match &tex.shadow {
        Some(s) if !as_render_target || !s.is_system() => return Ok(()),
        _ => {}
    }
    let format = if as_render_target {
        FormatRequest::External {
            texture: tex.texture,
            target: tex.target,
            format: tex.format,
        }
    } else {
        FormatRequest::Skeleton
    };
    let req = FboRequest {
        format,
        ..FboRequest::color(tex.format, tex.width, tex.height)
    };
    let fbo = create_fbo(dev, &req, "texture shadow", warns)?;
    tex.shadow = Some(fbo);
    Ok(())
}

/// Source coordinates of the four strip-order corners (top-left,
/// bottom-left, top-right, bottom-right) of an upright `w x h` image.
pub fn orientation_coords(orientation: Orientation, w: f32, h: f32) -> [[f32; 2]; 4] {
    match orientation {
        Orientation::Upright => [[0.0, h], [0.0, 0.0], [w, h], [w, 0.0]],
        Orientation::FlippedVertical => [[0.0, 0.0], [0.0, h], [w, 0.0], [w, h]],
        Orientation::Transposed => [[h, 0.0], [0.0, 0.0], [h, w], [0.0, w]],
    }
}

fn layout_program<D: GlDevice>(
    dev: &mut D,
    shaders: &mut ShaderCache,
    tex: &TextureRecord,
) -> Result<u32, ImagingError> {
    let (w, h) = (tex.width as f32, tex.height as f32);
    let program = match tex.layout {
        PixelLayout::Interleaved(4) => shaders.get_or_build(dev, ShaderPurpose::Passthrough, 4)?,
        PixelLayout::Interleaved(n) => {
            let p = shaders.get_or_build(dev, ShaderPurpose::Modulate, n)?;
            dev.set_uniform(p, "modulateColor", Uniform::Vec4([1.0; 4]));
            p
        }
        PixelLayout::Planar(n) => {
            let p = shaders.get_or_build(dev, ShaderPurpose::Planar, n)?;
            dev.set_uniform(p, "planeHeight", Uniform::Float(h));
            p
        }
        PixelLayout::Yuv420 => {
            let p = shaders.get_or_build(dev, ShaderPurpose::Yuv420, 3)?;
            dev.set_uniform(p, "planeHeight", Uniform::Float(h));
            dev.set_uniform(p, "planeWidth", Uniform::Float(w));
            p
        }
        PixelLayout::PackedLuma8 => shaders.get_or_build(dev, ShaderPurpose::PackedLuma8, 1)?,
    };
    Ok(program)
}

/// Re-render `tex` into a fresh upright, interleaved RGBA texture.
///
/// Returns the replaced texture name, which the caller still owns, or
/// `None` if the texture was already normalized.
pub fn normalize_texture_orientation<D: GlDevice>(
    dev: &mut D,
    shaders: &mut ShaderCache,
    state: &mut RenderStateCache,
    tex: &mut TextureRecord,
    warns: bool,
) -> Result<Option<u32>, ImagingError> {
    if tex.is_normalized() {
        return Ok(None);
    }
    let program = layout_program(dev, shaders, tex)?;
    let format = match tex.layout {
        PixelLayout::Yuv420 | PixelLayout::PackedLuma8 => ColorFormat::Rgba8,
        _ => tex.format,
    };
    let out = create_fbo(dev, &FboRequest::color(format, tex.width, tex.height), "normalized texture", warns)?;

    let (w, h) = (tex.width as f32, tex.height as f32);
    let pos = [[0.0, 0.0], [0.0, h], [w, 0.0], [w, h]];
    let uv = orientation_coords(tex.orientation, w, h);
    let verts: [TexVertex; 4] = std::array::from_fn(|i| TexVertex { pos: pos[i], uv: uv[i] });

    let saved_fb = dev.bound_framebuffer();
    dev.bind_framebuffer(out.framebuffer);
    dev.viewport(out.rect());
    state.ensure_ortho(dev, out.width, out.height);
    dev.set_scissor(None);
    dev.use_program(program);
    dev.bind_texture(0, tex.target, tex.texture);
    dev.draw_textured_quad(&verts, tex.target);
    dev.bind_texture(0, tex.target, 0);
    dev.use_program(0);
    dev.bind_framebuffer(saved_fb);

    debug!(
        from = tex.texture,
        to = out.color,
        orientation = ?tex.orientation,
        layout = ?tex.layout,
        "texture normalized"
    );
    let replaced = tex.texture;
    tex.release_shadow(dev);
    tex.texture = out.color;
    tex.target = out.target;
    tex.format = out.format;
    tex.orientation = Orientation::Upright;
    tex.layout = PixelLayout::Interleaved(4);
    tex.shadow = Some(out);
    Ok(Some(replaced))
}

/// Run the `UserDefinedBlit` chain from `src` into `dst`.
///
/// Both textures are normalized and given real shadow FBOs first. Bounce
/// buffers are allocated for this call only, as `mode` requests.
pub fn transform_texture<D: GlDevice>(
    exec: &mut Executor<'_, D>,
    mode: ImagingMode,
    src: &mut TextureRecord,
    dst: &mut TextureRecord,
    warns: bool,
) -> Result<(), ImagingError> {
    for tex in [&mut *src, &mut *dst] {
        normalize_texture_orientation(exec.dev, exec.shaders, exec.state, tex, warns)?;
        create_shadow_fbo(exec.dev, tex, true, warns)?;
    }

    let bounce_count = if mode.contains(ImagingMode::NEED_MULTI_PASS) {
        2
    } else if mode.contains(ImagingMode::NEED_DUAL_PASS) {
        1
    } else {
        0
    };
    let mut bounces = Vec::with_capacity(bounce_count);
    for _ in 0..bounce_count {
        let req = FboRequest::color(dst.format, dst.width, dst.height);
        match create_fbo(exec.dev, &req, "transform bounce", warns) {
            Ok(f) => bounces.push(f),
            Err(e) => {
                for mut b in bounces {
                    b.destroy(exec.dev);
                }
                return Err(e);
            }
        }
    }

    let targets = ChainTargets {
        src1: src.shadow.as_ref(),
        src2: None,
        dst: dst.shadow.as_ref(),
        bounce: [bounces.first(), bounces.get(1)],
    };
    let opts = ChainOptions {
        src_readonly: true,
        allow_swizzle: false,
    };
    let result = exec.execute_chain(HookPoint::UserDefinedBlit, &targets, opts, None);

    for mut b in bounces {
        b.destroy(exec.dev);
    }
    result
}
