//! FBO records and the factory that allocates them.

use stimpipe_core::{FboStatus, GfxCaps, ImagingError, PixelRect};
use tracing::{debug, warn};

use crate::device::{Attachment, ColorFormat, DepthFormat, GlDevice, StorageFormat, TexTarget};

/// One render target. A record with `framebuffer == 0` stands for the system
/// framebuffer; only its size is meaningful.
#[derive(Debug, Clone, PartialEq)]
pub struct Fbo {
    pub framebuffer: u32,
    /// Color attachment: a texture, or a renderbuffer when `color_is_renderbuffer`.
    pub color: u32,
    pub color_is_renderbuffer: bool,
    /// The color attachment came from outside and is not ours to delete.
    pub external_color: bool,
    pub target: TexTarget,
    pub format: ColorFormat,
    /// Packed depth-stencil, or depth alone.
    pub depth: u32,
    /// Separate stencil attachment, 0 if none or packed.
    pub stencil: u32,
    pub depth_format: Option<DepthFormat>,
    pub width: i32,
    pub height: i32,
    /// Allocated texture size; differs from `width`/`height` for padded
    /// power-of-two textures.
    pub tex_width: i32,
    pub tex_height: i32,
    pub samples: u32,
}

impl Fbo {
    pub fn system(width: i32, height: i32) -> Self {
        Self {
            framebuffer: 0,
            color: 0,
            color_is_renderbuffer: false,
            external_color: false,
            target: TexTarget::Rect,
            format: ColorFormat::Rgba8,
            depth: 0,
            stencil: 0,
            depth_format: None,
            width,
            height,
            tex_width: width,
            tex_height: height,
            samples: 0,
        }
    }

    pub fn is_system(&self) -> bool {
        self.framebuffer == 0
    }

    /// Color can be bound as a texture for reading.
    pub fn is_readable(&self) -> bool {
        !self.is_system() && !self.color_is_renderbuffer && self.color != 0
    }

    /// Both records render into the same storage.
    pub fn same_target(&self, other: &Fbo) -> bool {
        self.framebuffer == other.framebuffer && self.color == other.color
    }

    pub fn rect(&self) -> PixelRect {
        PixelRect::sized(self.width, self.height)
    }

    pub fn same_geometry(&self, other: &Fbo) -> bool {
        self.width == other.width
            && self.height == other.height
            && self.format == other.format
            && self.target == other.target
            && self.samples == other.samples
    }

    /// Free every GL object the record owns and reset it to a skeleton.
    pub fn destroy<D: GlDevice>(&mut self, dev: &mut D) {
        if self.framebuffer != 0 {
            dev.delete_framebuffer(self.framebuffer);
        }
        if self.color != 0 && !self.external_color {
            if self.color_is_renderbuffer {
                dev.delete_renderbuffer(self.color);
            } else {
                dev.delete_texture(self.color);
            }
        }
        for rb in [self.depth, self.stencil] {
            if rb != 0 {
                dev.delete_renderbuffer(rb);
            }
        }
        self.framebuffer = 0;
        self.color = 0;
        self.depth = 0;
        self.stencil = 0;
        self.depth_format = None;
    }
}

/// Color storage of a new FBO.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatRequest {
    Allocate(ColorFormat),
    /// Attach an existing color texture instead of allocating one.
    External {
        texture: u32,
        target: TexTarget,
        format: ColorFormat,
    },
    /// Fill in the record only; no GL objects. Upgraded on first use as a render target.
    Skeleton,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FboRequest {
    pub format: FormatRequest,
    pub depth_stencil: bool,
    pub width: i32,
    pub height: i32,
    pub samples: u32,
    /// Square power-of-two 2D texture instead of a rectangle texture.
    pub pot_2d: bool,
    /// Multisample color texture instead of a multisample renderbuffer.
    pub multisample_texture: bool,
}

impl FboRequest {
    pub fn color(format: ColorFormat, width: i32, height: i32) -> Self {
        Self {
            format: FormatRequest::Allocate(format),
            depth_stencil: false,
            width,
            height,
            samples: 0,
            pot_2d: false,
            multisample_texture: false,
        }
    }

    pub fn with_depth_stencil(mut self, on: bool) -> Self {
        self.depth_stencil = on;
        self
    }

    pub fn with_samples(mut self, samples: u32) -> Self {
        self.samples = samples;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DepthPlan {
    None,
    Packed,
    Separate,
    Depth24,
    Depth16,
}

impl DepthPlan {
    fn next(self) -> Option<DepthPlan> {
        match self {
            DepthPlan::Packed => Some(DepthPlan::Separate),
            DepthPlan::Separate => Some(DepthPlan::Depth24),
            DepthPlan::Depth24 => Some(DepthPlan::Depth16),
            DepthPlan::Depth16 | DepthPlan::None => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Attempt {
    samples: u32,
    ms_texture: bool,
    depth: DepthPlan,
}

fn initial_depth(caps: GfxCaps, wanted: bool) -> DepthPlan {
    match (wanted, caps.contains(GfxCaps::PACKED_DEPTH_STENCIL)) {
        (false, _) => DepthPlan::None,
        (true, true) => DepthPlan::Packed,
        (true, false) => DepthPlan::Separate,
    }
}

/// Allocate one FBO, walking the fallback ladder until it is complete:
/// multisample texture -> multisample renderbuffer, fewer samples, separate
/// depth and stencil, depth only, 16-bit depth.
///
/// The framebuffer binding is 0 on return, whatever the outcome.
pub fn create_fbo<D: GlDevice>(
    dev: &mut D,
    req: &FboRequest,
    stage: &str,
    warns: bool,
) -> Result<Fbo, ImagingError> {
    let caps = dev.caps();
    if req.width <= 0 || req.height <= 0 {
        return Err(ImagingError::Precondition(format!(
            "{stage} framebuffer needs a positive size, got {}x{}",
            req.width, req.height
        )));
    }

    let (color_format, external) = match req.format {
        FormatRequest::Skeleton => return Ok(skeleton(req)),
        FormatRequest::Allocate(f) => (f, None),
        FormatRequest::External {
            texture,
            target,
            format,
        } => (format, Some((texture, target))),
    };

    let mut samples = req.samples;
    if samples > 0 && external.is_some() {
        samples = 0;
    }
    if samples > 0 && !caps.contains(GfxCaps::FBO_MULTISAMPLE) {
        if warns {
            warn!(stage, "multisampled framebuffers unsupported; multisampling disabled");
        }
        samples = 0;
    }
    let max = dev.max_samples();
    if samples > max {
        if warns {
            warn!(stage, requested = samples, max, "clamping multisample count to device maximum");
        }
        samples = max;
    }

    let mut attempt = Attempt {
        samples,
        ms_texture: req.multisample_texture && caps.contains(GfxCaps::MULTISAMPLE_TEXTURE),
        depth: initial_depth(caps, req.depth_stencil),
    };

    loop {
        let status = try_allocate(dev, req, color_format, external, attempt)?;
        let failed = match status {
            Ok(fbo) => {
                dev.bind_framebuffer(0);
                if attempt.samples != req.samples || attempt.depth != initial_depth(caps, req.depth_stencil) {
                    debug!(
                        stage,
                        samples = fbo.samples,
                        depth = ?fbo.depth_format,
                        "framebuffer complete after fallback"
                    );
                }
                return Ok(fbo);
            }
            Err(status) => status,
        };
        dev.bind_framebuffer(0);

        match next_attempt(attempt, failed, req.depth_stencil, caps) {
            Some(next) => {
                if warns && next.depth == DepthPlan::Depth24 && attempt.depth != DepthPlan::Depth24 {
                    warn!(stage, "no usable stencil buffer; continuing with depth only");
                }
                attempt = next;
            }
            None => {
                return Err(ImagingError::FboAllocation {
                    stage: stage.to_string(),
                    status: failed,
                });
            }
        }
    }
}

fn next_attempt(a: Attempt, status: FboStatus, wants_depth: bool, caps: GfxCaps) -> Option<Attempt> {
    if a.ms_texture {
        return Some(Attempt {
            ms_texture: false,
            ..a
        });
    }
    if status == FboStatus::IncompleteMultisample && a.samples > 0 {
        return Some(Attempt {
            samples: a.samples - 1,
            ..a
        });
    }
    if let Some(depth) = a.depth.next() {
        return Some(Attempt { depth, ..a });
    }
    if a.samples > 0 {
        return Some(Attempt {
            samples: a.samples - 1,
            depth: initial_depth(caps, wants_depth),
            ..a
        });
    }
    None
}

fn skeleton(req: &FboRequest) -> Fbo {
    let mut fbo = Fbo::system(req.width, req.height);
    fbo.target = if req.pot_2d { TexTarget::Tex2D } else { TexTarget::Rect };
    fbo
}

/// One allocation attempt. Device errors abort the ladder; an incomplete
/// framebuffer comes back as `Ok(Err(status))` with everything freed.
fn try_allocate<D: GlDevice>(
    dev: &mut D,
    req: &FboRequest,
    format: ColorFormat,
    external: Option<(u32, TexTarget)>,
    a: Attempt,
) -> Result<Result<Fbo, FboStatus>, ImagingError> {
    let caps = dev.caps();
    let (tex_width, tex_height) = if req.pot_2d && !caps.contains(GfxCaps::NPOT_TEXTURES) {
        let side = (req.width.max(req.height) as u32).next_power_of_two() as i32;
        (side, side)
    } else {
        (req.width, req.height)
    };

    let mut fbo = Fbo {
        framebuffer: dev.create_framebuffer()?,
        color: 0,
        color_is_renderbuffer: false,
        external_color: external.is_some(),
        target: TexTarget::Rect,
        format,
        depth: 0,
        stencil: 0,
        depth_format: None,
        width: req.width,
        height: req.height,
        tex_width,
        tex_height,
        samples: a.samples,
    };
    dev.bind_framebuffer(fbo.framebuffer);

    let built = attach_all(dev, req, &mut fbo, external, a);
    let status = match built {
        Ok(()) => dev.framebuffer_status(),
        Err(e) => {
            fbo.destroy(dev);
            dev.bind_framebuffer(0);
            return Err(e);
        }
    };
    if status.is_complete() {
        Ok(Ok(fbo))
    } else {
        fbo.destroy(dev);
        Ok(Err(status))
    }
}

fn attach_all<D: GlDevice>(
    dev: &mut D,
    req: &FboRequest,
    fbo: &mut Fbo,
    external: Option<(u32, TexTarget)>,
    a: Attempt,
) -> Result<(), ImagingError> {
    let color = StorageFormat::Color(fbo.format);
    if let Some((texture, target)) = external {
        fbo.color = texture;
        fbo.target = target;
        dev.attach_texture(Attachment::Color0, target, texture);
    } else if a.samples > 0 && !a.ms_texture {
        fbo.color = dev.create_renderbuffer(color, fbo.width, fbo.height, a.samples)?;
        fbo.color_is_renderbuffer = true;
        dev.attach_renderbuffer(Attachment::Color0, fbo.color);
    } else {
        fbo.target = if a.samples > 0 {
            TexTarget::Tex2DMultisample
        } else if req.pot_2d {
            TexTarget::Tex2D
        } else {
            TexTarget::Rect
        };
        fbo.color = dev.create_texture(fbo.target, color, fbo.tex_width, fbo.tex_height, a.samples)?;
        dev.attach_texture(Attachment::Color0, fbo.target, fbo.color);
    }

    let (w, h, s) = (fbo.width, fbo.height, a.samples);
    match a.depth {
        DepthPlan::None => {}
        DepthPlan::Packed => {
            let f = DepthFormat::Depth24Stencil8;
            fbo.depth = dev.create_renderbuffer(StorageFormat::Depth(f), w, h, s)?;
            fbo.depth_format = Some(f);
            dev.attach_renderbuffer(Attachment::DepthStencil, fbo.depth);
        }
        DepthPlan::Separate => {
            fbo.depth = dev.create_renderbuffer(StorageFormat::Depth(DepthFormat::Depth24), w, h, s)?;
            fbo.depth_format = Some(DepthFormat::Depth24);
            dev.attach_renderbuffer(Attachment::Depth, fbo.depth);
            fbo.stencil = dev.create_renderbuffer(StorageFormat::Depth(DepthFormat::Stencil8), w, h, s)?;
            dev.attach_renderbuffer(Attachment::Stencil, fbo.stencil);
        }
        DepthPlan::Depth24 | DepthPlan::Depth16 => {
            let f = if a.depth == DepthPlan::Depth24 {
                DepthFormat::Depth24
            } else {
                DepthFormat::Depth16
            };
            fbo.depth = dev.create_renderbuffer(StorageFormat::Depth(f), w, h, s)?;
            fbo.depth_format = Some(f);
            dev.attach_renderbuffer(Attachment::Depth, fbo.depth);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ladder_prefers_renderbuffer_before_fewer_samples() {
        let caps = GfxCaps::PACKED_DEPTH_STENCIL;
        let a = Attempt {
            samples: 4,
            ms_texture: true,
            depth: DepthPlan::Packed,
        };
        let b = next_attempt(a, FboStatus::IncompleteMultisample, true, caps).unwrap();
        assert!(!b.ms_texture);
        assert_eq!(b.samples, 4);
        let c = next_attempt(b, FboStatus::IncompleteMultisample, true, caps).unwrap();
        assert_eq!(c.samples, 3);
        assert_eq!(c.depth, DepthPlan::Packed);
    }

    #[test]
    fn depth_ladder_then_samples_then_exhaustion() {
        let caps = GfxCaps::PACKED_DEPTH_STENCIL;
        let mut a = Attempt {
            samples: 1,
            ms_texture: false,
            depth: DepthPlan::Packed,
        };
        let mut seen = vec![];
        while let Some(n) = next_attempt(a, FboStatus::Unsupported, true, caps) {
            seen.push((n.samples, n.depth));
            a = n;
        }
        assert_eq!(
            seen,
            vec![
                (1, DepthPlan::Separate),
                (1, DepthPlan::Depth24),
                (1, DepthPlan::Depth16),
                (0, DepthPlan::Packed),
                (0, DepthPlan::Separate),
                (0, DepthPlan::Depth24),
                (0, DepthPlan::Depth16),
            ]
        );
    }

    #[test]
    fn system_record_is_not_readable() {
        let s = Fbo::system(640, 480);
        assert!(s.is_system());
        assert!(!s.is_readable());
        assert!(s.same_target(&Fbo::system(10, 10)));
    }
}
