//! Geometry emission strategies used by shader and built-in entries.

use stimpipe_core::{GfxCaps, ImagingError};
use stimpipe_hooks::{BlitOptions, BlitterChoice, TextureTarget};

use crate::device::{Affine2, Filter, GlDevice, TexTarget, TexVertex, Uniform};
use crate::fbo::Fbo;

/// Everything a blitter needs for one draw into the current destination.
#[derive(Debug, Clone, Copy)]
pub struct BlitPass<'a> {
    pub src1: Option<&'a Fbo>,
    pub src2: Option<&'a Fbo>,
    pub dst: &'a Fbo,
    pub opts: &'a BlitOptions,
    /// A user program is bound and handles multisample sources itself.
    pub program_bound: bool,
    /// Explicit fetch-and-average program for multisample-texture sources, 0 if not built.
    pub ms_program: u32,
    /// A scissor built-in ran in this pass; leave the scissor alone.
    pub user_scissor: bool,
}

/// Replaceable blit strategy. The executor uses [`blit`] unless the caller
/// passes an override.
pub trait Blitter<D: GlDevice> {
    fn blit(&mut self, dev: &mut D, pass: &BlitPass<'_>) -> Result<(), ImagingError>;
}

/// Dispatches on the entry's `Blitter:` option.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultBlitter;

impl<D: GlDevice> Blitter<D> for DefaultBlitter {
    fn blit(&mut self, dev: &mut D, pass: &BlitPass<'_>) -> Result<(), ImagingError> {
        blit(dev, pass)
    }
}

pub fn blit<D: GlDevice>(dev: &mut D, pass: &BlitPass<'_>) -> Result<(), ImagingError> {
    match pass.opts.blitter {
        BlitterChoice::Identity => identity_blit(dev, pass),
        BlitterChoice::DisplayList { handle } => display_list_blit(dev, pass, handle),
    }
}

fn tex_target(t: TextureTarget) -> TexTarget {
    match t {
        TextureTarget::Tex1D => TexTarget::Tex1D,
        TextureTarget::Tex2D => TexTarget::Tex2D,
        TextureTarget::Rect => TexTarget::Rect,
        TextureTarget::Tex3D => TexTarget::Tex3D,
    }
}

/// Texture setup shared by all blitters; `teardown` undoes it.
fn setup<D: GlDevice>(dev: &mut D, pass: &BlitPass<'_>) {
    for b in &pass.opts.textures {
        dev.bind_texture(b.unit, tex_target(b.target), b.texture);
    }
    if pass.opts.bilinear {
        if let Some(src) = pass.src1.filter(|s| s.is_readable()) {
            dev.set_texture_filter(src.target, src.color, Filter::Linear);
        }
    }
    if !pass.user_scissor {
        dev.set_scissor(Some(pass.dst.rect()));
    }
}

fn teardown<D: GlDevice>(dev: &mut D, pass: &BlitPass<'_>) {
    if pass.opts.bilinear {
        if let Some(src) = pass.src1.filter(|s| s.is_readable()) {
            dev.set_texture_filter(src.target, src.color, Filter::Nearest);
        }
    }
    for b in &pass.opts.textures {
        dev.bind_texture(b.unit, tex_target(b.target), 0);
    }
}

/// Offset, scaling and rotation of a `w x h` quad anchored at the origin.
pub fn quad_transform(opts: &BlitOptions, w: f32, h: f32) -> Affine2 {
    let [sx, sy] = opts.scaling.unwrap_or([1.0, 1.0]);
    let [ox, oy] = opts.offset.unwrap_or([0.0, 0.0]);
    let placed = Affine2([sx, 0.0, ox, 0.0, sy, oy]);
    let Some(deg) = opts.rotation else {
        return placed;
    };
    let [cx, cy] = opts
        .rot_center
        .unwrap_or([ox + sx * w * 0.5, oy + sy * h * 0.5]);
    let (s, c) = deg.to_radians().sin_cos();
    let rot = Affine2([c, -s, cx - c * cx + s * cy, s, c, cy - s * cx - c * cy]);
    rot.then(&placed)
}

/// Texture coordinates (s0, t_top, s1, t_bottom) covering the logical image of `src`.
fn source_coords(src: &Fbo) -> [f32; 4] {
    let (w, h) = (src.width as f32, src.height as f32);
    match src.target {
        TexTarget::Tex2D => [0.0, h / src.tex_height as f32, w / src.tex_width as f32, 0.0],
        _ => [0.0, h, w, 0.0],
    }
}

/// Quad vertices in strip order (top-left, bottom-left, top-right, bottom-right).
pub fn quad_vertices(opts: &BlitOptions, src: &Fbo) -> [TexVertex; 4] {
    let [w, h] = opts
        .ovr_size
        .unwrap_or([src.width as f32, src.height as f32]);
    let m = quad_transform(opts, w, h);
    let [s0, t_top, s1, t_bottom] = source_coords(src);
    [
        TexVertex {
            pos: m.apply([0.0, 0.0]),
            uv: [s0, t_top],
        },
        TexVertex {
            pos: m.apply([0.0, h]),
            uv: [s0, t_bottom],
        },
        TexVertex {
            pos: m.apply([w, 0.0]),
            uv: [s1, t_top],
        },
        TexVertex {
            pos: m.apply([w, h]),
            uv: [s1, t_bottom],
        },
    ]
}

/// One textured quad covering the source image.
pub fn identity_blit<D: GlDevice>(dev: &mut D, pass: &BlitPass<'_>) -> Result<(), ImagingError> {
    let src = pass
        .src1
        .ok_or_else(|| ImagingError::Precondition("identity blit has no source buffer".to_string()))?;

    let ms_fetch = src.target == TexTarget::Tex2DMultisample && !pass.program_bound;
    if ms_fetch {
        if pass.ms_program == 0 {
            return Err(ImagingError::Precondition(
                "multisample texture source needs the fetch-and-average program".to_string(),
            ));
        }
        dev.use_program(pass.ms_program);
        dev.set_uniform(pass.ms_program, "nrsamples", Uniform::Int(src.samples as i32));
    }

    setup(dev, pass);
    let verts = quad_vertices(pass.opts, src);
    dev.draw_textured_quad(&verts, src.target);
    teardown(dev, pass);

    if ms_fetch {
        dev.use_program(0);
    }
    Ok(())
}

/// Replay a retained geometry list with the entry's placement modifiers.
pub fn display_list_blit<D: GlDevice>(dev: &mut D, pass: &BlitPass<'_>, handle: u32) -> Result<(), ImagingError> {
    if !dev.caps().contains(GfxCaps::GEOMETRY_LISTS) {
        return Err(ImagingError::Unsupported(
            "display list blits need retained geometry lists".to_string(),
        ));
    }
    let (w, h) = match pass.src1 {
        Some(src) => (src.width as f32, src.height as f32),
        None => (pass.dst.width as f32, pass.dst.height as f32),
    };
    let m = quad_transform(pass.opts, w, h);
    setup(dev, pass);
    let drawn = dev.draw_geometry_list(handle, &m);
    teardown(dev, pass);
    drawn
}
