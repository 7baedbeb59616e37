//! Built-in chain operations.

use stimpipe_core::{ImagingError, PixelRect};
use stimpipe_hooks::{BlitOptions, BuiltinOp, HookPoint, SyncLineStyle};

use crate::blitter::{self, BlitPass, Blitter};
use crate::device::{BlendFactor, BlendState, GlDevice};
use crate::executor::{Executor, Pass};
use crate::fbo::Fbo;
use crate::host::{expand_macros, GammaTable, MACRO_GAMMATABLE};

/// Unlock code that switches a Bits++ box into CLUT mode for this frame.
const BITS_PLUS_PLUS_TLOCK: [[u8; 3]; 8] = [
    [36, 106, 133],
    [63, 136, 163],
    [8, 19, 138],
    [211, 25, 46],
    [3, 115, 164],
    [112, 68, 9],
    [56, 41, 49],
    [34, 159, 208],
];

pub const BITS_PLUS_PLUS_CLUT_SLOTS: usize = 256;

/// Top-scanline encoding of a 256-slot gamma table: the T-Lock code, then per
/// slot one pixel with the high bytes and one with the low bytes of the
/// 16-bit RGB values.
pub fn bits_plus_plus_row(table: &GammaTable) -> Result<Vec<u8>, ImagingError> {
    if table.len() != BITS_PLUS_PLUS_CLUT_SLOTS {
        return Err(ImagingError::Precondition(format!(
            "Bits++ needs a {BITS_PLUS_PLUS_CLUT_SLOTS}-slot gamma table, got {}",
            table.len()
        )));
    }
    let mut row = Vec::with_capacity(3 * (BITS_PLUS_PLUS_TLOCK.len() + 2 * BITS_PLUS_PLUS_CLUT_SLOTS));
    for px in BITS_PLUS_PLUS_TLOCK {
        row.extend_from_slice(&px);
    }
    for i in 0..BITS_PLUS_PLUS_CLUT_SLOTS {
        let v: [u16; 3] = [0, 1, 2].map(|c| (table.channel(c)[i].clamp(0.0, 1.0) * 65535.0).round() as u16);
        row.extend(v.iter().map(|x| (x >> 8) as u8));
        row.extend(v.iter().map(|x| (x & 0xff) as u8));
    }
    Ok(row)
}

/// Bottom-row rectangles of a sync line: the black background and the
/// colored segment covering `fraction` of the width.
pub fn sync_line_rects(dst: &Fbo, style: &SyncLineStyle, fraction: f32) -> ([f32; 4], [f32; 4]) {
    let (w, h) = (dst.width as f32, dst.height as f32);
    let y0 = (h - style.height as f32).max(0.0);
    ([0.0, y0, w, h], [0.0, y0, w * fraction, h])
}

impl<D: GlDevice> Executor<'_, D> {
    pub(crate) fn run_builtin(
        &mut self,
        hook: HookPoint,
        op: &BuiltinOp,
        config: &str,
        pass: &mut Pass<'_>,
        blitter: Option<&mut dyn Blitter<D>>,
    ) -> Result<(), ImagingError> {
        match op {
            BuiltinOp::IdentityBlit => {
                let dst = require_dst(pass, op)?;
                let opts = BlitOptions::default();
                let bp = BlitPass {
                    src1: pass.src1,
                    src2: pass.src2,
                    dst,
                    opts: &opts,
                    program_bound: false,
                    ms_program: self.ms_program_for(pass.src1)?,
                    user_scissor: pass.user_scissor,
                };
                match blitter {
                    Some(b) => b.blit(self.dev, &bp),
                    None => blitter::identity_blit(self.dev, &bp),
                }
            }
            // Consumed by the executor before dispatch.
            BuiltinOp::FlipFBOs => Ok(()),
            BuiltinOp::RestrictToScissorRect(rect) => {
                match rect {
                    Some(r) => {
                        self.dev.set_scissor(Some(PixelRect::new(r.x, r.y, r.w, r.h)));
                        pass.user_scissor = true;
                    }
                    None => {
                        self.dev.set_scissor(None);
                        pass.user_scissor = false;
                    }
                }
                Ok(())
            }
            BuiltinOp::RenderClutBitsPlusPlus => {
                require_dst(pass, op)?;
                let table = self.gamma.loaded.as_ref().ok_or_else(|| {
                    ImagingError::Precondition("Bits++ encoder has no gamma table to encode".to_string())
                })?;
                let row = bits_plus_plus_row(table)?;
                self.dev.write_pixel_row(0, 0, &row);
                Ok(())
            }
            BuiltinOp::RenderClutViaRuntime => {
                let Some(table) = self.gamma.pending.as_ref() else {
                    return Ok(());
                };
                self.host
                    .set_named_variable("base", MACRO_GAMMATABLE, table.to_host_value())?;
                let code = expand_macros(config, self.host, self.gamma, self.flip_count)?;
                self.host.evaluate(&code)?;
                self.gamma.pending = None;
                Ok(())
            }
            BuiltinOp::RenderStereoSyncLine(style) => {
                let dst = require_dst(pass, op)?;
                let fraction = if hook == HookPoint::RightFinalizerBlitChain {
                    0.75
                } else {
                    0.25
                };
                let (background, line) = sync_line_rects(dst, style, fraction);
                self.dev.draw_solid_rect(background, [0.0, 0.0, 0.0, 1.0]);
                let [r, g, b] = style.color;
                self.dev.draw_solid_rect(line, [r, g, b, 1.0]);
                Ok(())
            }
            BuiltinOp::AlphaPostMultiply => {
                let dst = require_dst(pass, op)?;
                // rgb *= dst alpha, alpha unchanged
                self.dev.set_blend(Some(BlendState {
                    src_rgb: BlendFactor::Zero,
                    dst_rgb: BlendFactor::DstAlpha,
                    src_alpha: BlendFactor::Zero,
                    dst_alpha: BlendFactor::One,
                }));
                self.dev.draw_solid_rect(
                    [0.0, 0.0, dst.width as f32, dst.height as f32],
                    [1.0, 1.0, 1.0, 1.0],
                );
                self.dev.set_blend(None);
                Ok(())
            }
        }
    }
}

fn require_dst<'p>(pass: &Pass<'p>, op: &BuiltinOp) -> Result<&'p Fbo, ImagingError> {
    pass.dst.ok_or_else(|| {
        ImagingError::Precondition(format!("built-in '{}' has no destination buffer", op.name()))
    })
}
