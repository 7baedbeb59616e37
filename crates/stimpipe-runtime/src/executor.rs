//! Runs one hook chain over a set of source, destination and bounce buffers.

use std::fmt;

use stimpipe_core::ImagingError;
use stimpipe_hooks::{HookChains, HookEntry, HookKind, HookPoint, NativeCall};
use tracing::{debug, error};

use crate::blitter::{self, BlitPass, Blitter};
use crate::device::{GlDevice, TexTarget};
use crate::fbo::Fbo;
use crate::host::{expand_macros, GammaState, HostRuntime};
use crate::shaders::{ShaderCache, ShaderPurpose};

/// Caller-supplied buffers of one chain execution.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChainTargets<'a> {
    pub src1: Option<&'a Fbo>,
    /// Second input, bound to texture unit 1 (the other stereo view).
    pub src2: Option<&'a Fbo>,
    pub dst: Option<&'a Fbo>,
    /// Primary and secondary bounce buffers for multi-pass chains.
    pub bounce: [Option<&'a Fbo>; 2],
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChainOptions {
    /// `src1` must not be written, not even as a spare bounce buffer.
    pub src_readonly: bool,
    /// `dst` may stand in for a missing secondary bounce buffer.
    pub allow_swizzle: bool,
}

/// Per-window render state remembered across chain executions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderStateCache {
    last_ortho: Option<(i32, i32)>,
}

impl RenderStateCache {
    /// Set the orthographic projection unless it already has this size.
    pub fn ensure_ortho<D: GlDevice>(&mut self, dev: &mut D, width: i32, height: i32) {
        if self.last_ortho != Some((width, height)) {
            dev.set_projection_ortho(width, height);
            self.last_ortho = Some((width, height));
        }
    }

    pub fn invalidate(&mut self) {
        self.last_ortho = None;
    }

    pub fn last_ortho(&self) -> Option<(i32, i32)> {
        self.last_ortho
    }
}

/// Source and destination of each pass, one pass per ping-pong marker plus one.
///
/// Pass `j < n` writes bounce buffer `(n - 1 - j) % 2` (0 = primary), pass `n`
/// writes `dst`, and every pass reads what the previous one wrote. No pass
/// ever reads the buffer it writes.
pub fn plan_passes<'a>(
    hook: HookPoint,
    markers: usize,
    t: &ChainTargets<'a>,
    opts: ChainOptions,
) -> Result<Vec<(Option<&'a Fbo>, Option<&'a Fbo>)>, ImagingError> {
    if markers == 0 {
        return Ok(vec![(t.src1, t.dst)]);
    }
    if hook.is_single_pass_only() {
        return Err(ImagingError::Precondition(format!(
            "hook chain '{hook}' is single-pass only but holds {markers} ping-pong marker(s)"
        )));
    }
    let dst = t.dst.ok_or_else(|| {
        ImagingError::Precondition(format!("multi-pass hook chain '{hook}' has no destination buffer"))
    })?;
    let primary = t.bounce[0].ok_or_else(|| ImagingError::ChainMismatch {
        hook: hook.to_string(),
        needed: "a bounce buffer".to_string(),
        hint: "dual-pass (NEED_DUAL_PASS)".to_string(),
    })?;
    let secondary = if markers >= 2 {
        spare_bounce(hook, markers, t, opts, primary, dst)?
    } else {
        primary
    };

    let mut passes = Vec::with_capacity(markers + 1);
    let mut src = t.src1;
    for j in 0..markers {
        let out = if (markers - 1 - j) % 2 == 0 { primary } else { secondary };
        passes.push((src, Some(out)));
        src = Some(out);
    }
    passes.push((src, Some(dst)));
    Ok(passes)
}

fn spare_bounce<'a>(
    hook: HookPoint,
    markers: usize,
    t: &ChainTargets<'a>,
    opts: ChainOptions,
    primary: &'a Fbo,
    dst: &'a Fbo,
) -> Result<&'a Fbo, ImagingError> {
    if let Some(b) = t.bounce[1] {
        return Ok(b);
    }
    let distinct = |f: &Fbo| !f.same_target(primary) && t.src1.map_or(true, |s| !s.same_target(f));
    if opts.allow_swizzle && dst.is_readable() && distinct(dst) {
        return Ok(dst);
    }
    // With an odd marker count the first pass writes the primary buffer, so
    // the source is free once it has been read.
    if let Some(src) = t.src1 {
        if !opts.src_readonly && markers % 2 == 1 && src.is_readable() && !src.same_target(primary) && !src.same_target(dst) {
            return Ok(src);
        }
    }
    Err(ImagingError::ChainMismatch {
        hook: hook.to_string(),
        needed: "a second bounce buffer".to_string(),
        hint: "multi-pass (NEED_MULTI_PASS)".to_string(),
    })
}

/// Borrowed window state the executor works with.
pub struct Executor<'a, D: GlDevice> {
    pub dev: &'a mut D,
    pub chains: &'a HookChains,
    pub shaders: &'a mut ShaderCache,
    pub state: &'a mut RenderStateCache,
    pub host: &'a mut dyn HostRuntime,
    pub gamma: &'a mut GammaState,
    pub flip_count: u64,
    /// Log every dispatched entry.
    pub trace: bool,
}

impl<D: GlDevice> fmt::Debug for Executor<'_, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executor")
            .field("flip_count", &self.flip_count)
            .field("trace", &self.trace)
            .finish_non_exhaustive()
    }
}

/// State of the pass currently being rendered.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Pass<'a> {
    pub src1: Option<&'a Fbo>,
    pub src2: Option<&'a Fbo>,
    pub dst: Option<&'a Fbo>,
    pub user_scissor: bool,
}

impl<'a, D: GlDevice> Executor<'a, D> {
    /// Run every entry of `hook` in order. A disabled or empty chain succeeds
    /// without touching any state.
    ///
    /// The first failing entry ends the chain and yields `EntryFailed`; a
    /// missing bounce buffer yields `ChainMismatch` before anything runs.
    /// Bound framebuffer and scissor state are restored either way.
    pub fn execute_chain(
        &mut self,
        hook: HookPoint,
        targets: &ChainTargets<'_>,
        opts: ChainOptions,
        mut blitter: Option<&mut dyn Blitter<D>>,
    ) -> Result<(), ImagingError> {
        if !self.chains.is_operational(hook) {
            return Ok(());
        }
        let chains = self.chains;
        let entries = chains.entries(hook);
        let markers = chains.ping_pong_markers(hook);
        let passes = plan_passes(hook, markers, targets, opts)?;

        let saved_fb = self.dev.bound_framebuffer();
        let saved_scissor = self.dev.scissor();

        let mut pass_no = 0;
        let mut pass = Pass {
            src1: passes[0].0,
            src2: targets.src2,
            dst: passes[0].1,
            user_scissor: false,
        };
        self.setup_render_flow(&pass);

        let mut result = Ok(());
        for entry in entries {
            if entry.kind.is_ping_pong_marker() {
                pass_no += 1;
                pass.src1 = passes[pass_no].0;
                pass.dst = passes[pass_no].1;
                pass.user_scissor = false;
                self.setup_render_flow(&pass);
                continue;
            }
            if self.trace {
                debug!(hook = %hook, entry = %entry.name, pass = pass_no, "dispatch");
            }
            let dispatched = match blitter {
                Some(ref mut b) => self.dispatch(hook, entry, &mut pass, Some(&mut **b)),
                None => self.dispatch(hook, entry, &mut pass, None),
            };
            if let Err(e) = dispatched {
                error!(hook = %hook, entry = %entry.name, %e, "hook chain entry failed, rest of chain skipped");
                result = Err(ImagingError::EntryFailed {
                    hook: hook.to_string(),
                    entry: entry.name.clone(),
                    reason: e.to_string(),
                });
                break;
            }
        }

        for unit in 0..3 {
            self.dev.bind_texture(unit, TexTarget::Rect, 0);
        }
        self.dev.use_program(0);
        self.dev.bind_framebuffer(saved_fb);
        self.dev.set_scissor(saved_scissor);
        result
    }

    fn setup_render_flow(&mut self, pass: &Pass<'_>) {
        match pass.src1.filter(|s| s.is_readable()) {
            Some(s) => self.dev.bind_texture(0, s.target, s.color),
            None => self.dev.bind_texture(0, TexTarget::Rect, 0),
        }
        if let Some(s) = pass.src2.filter(|s| s.is_readable()) {
            self.dev.bind_texture(1, s.target, s.color);
        }
        if let Some(d) = pass.dst {
            self.dev.bind_framebuffer(d.framebuffer);
            self.dev.viewport(d.rect());
            self.state.ensure_ortho(self.dev, d.width, d.height);
        }
    }

    fn dispatch(
        &mut self,
        hook: HookPoint,
        entry: &HookEntry,
        pass: &mut Pass<'_>,
        blitter: Option<&mut dyn Blitter<D>>,
    ) -> Result<(), ImagingError> {
        match &entry.kind {
            HookKind::Shader {
                program,
                blit,
                lut_texture,
                ..
            } => {
                let dst = pass
                    .dst
                    .ok_or_else(|| ImagingError::Precondition("shader entry has no destination buffer".to_string()))?;
                self.dev.use_program(*program);
                if *lut_texture != 0 {
                    self.dev.bind_texture(2, TexTarget::Rect, *lut_texture);
                }
                let bp = BlitPass {
                    src1: pass.src1,
                    src2: pass.src2,
                    dst,
                    opts: blit,
                    program_bound: true,
                    ms_program: 0,
                    user_scissor: pass.user_scissor,
                };
                let drawn = match blitter {
                    Some(b) => b.blit(self.dev, &bp),
                    None => blitter::blit(self.dev, &bp),
                };
                if *lut_texture != 0 {
                    self.dev.bind_texture(2, TexTarget::Rect, 0);
                }
                self.dev.use_program(0);
                drawn
            }
            HookKind::Builtin { op, config } => self.run_builtin(hook, op, config, pass, blitter),
            HookKind::NativeCallback { callback, params } => {
                let params = expand_macros(params, self.host, self.gamma, self.flip_count)?;
                let size = pass.dst.or(pass.src1).map_or((0, 0), |f| (f.width, f.height));
                let call = NativeCall {
                    hook,
                    params: &params,
                    src_texture: pass.src1.filter(|s| s.is_readable()).map_or(0, |s| s.color),
                    dst_framebuffer: pass.dst.map_or(0, |d| d.framebuffer),
                    width: size.0,
                    height: size.1,
                    flip_count: self.flip_count,
                };
                if callback.call(&call) {
                    Ok(())
                } else {
                    Err(ImagingError::other("native callback reported failure"))
                }
            }
            HookKind::RuntimeCallback { eval } => {
                let code = expand_macros(eval, self.host, self.gamma, self.flip_count)?;
                self.host.evaluate(&code)
            }
        }
    }

    /// Fetch-and-average program for multisample texture sources, built on demand.
    pub(crate) fn ms_program_for(&mut self, src: Option<&Fbo>) -> Result<u32, ImagingError> {
        match src {
            Some(s) if s.target == TexTarget::Tex2DMultisample => {
                self.shaders
                    .get_or_build(self.dev, ShaderPurpose::MultisampleResolve, 4)
            }
            _ => Ok(0),
        }
    }
}

/// Run a chain that executes without a GL context: only callbacks can run.
pub fn execute_non_gl_chain(
    chains: &HookChains,
    hook: HookPoint,
    host: &mut dyn HostRuntime,
    gamma: &GammaState,
    flip_count: u64,
) -> Result<(), ImagingError> {
    if !chains.is_operational(hook) {
        return Ok(());
    }
    for entry in chains.entries(hook) {
        let ran = match &entry.kind {
            HookKind::NativeCallback { callback, params } => {
                expand_macros(params, host, gamma, flip_count).and_then(|params| {
                    let call = NativeCall {
                        hook,
                        params: &params,
                        src_texture: 0,
                        dst_framebuffer: 0,
                        width: 0,
                        height: 0,
                        flip_count,
                    };
                    if callback.call(&call) {
                        Ok(())
                    } else {
                        Err(ImagingError::other("native callback reported failure"))
                    }
                })
            }
            HookKind::RuntimeCallback { eval } => {
                expand_macros(eval, host, gamma, flip_count).and_then(|code| host.evaluate(&code))
            }
            HookKind::Shader { .. } | HookKind::Builtin { .. } => Err(ImagingError::Precondition(
                "entry needs a GL context, which is gone".to_string(),
            )),
        };
        if let Err(e) = ran {
            error!(hook = %hook, entry = %entry.name, %e, "hook chain entry failed, rest of chain skipped");
            return Err(ImagingError::EntryFailed {
                hook: hook.to_string(),
                entry: entry.name.clone(),
                reason: e.to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fbo(id: u32) -> Fbo {
        let mut f = Fbo::system(16, 16);
        f.framebuffer = id;
        f.color = 100 + id;
        f
    }

    #[test]
    fn single_pass_reads_src_and_writes_dst() {
        let (s, d) = (fbo(1), fbo(2));
        let t = ChainTargets {
            src1: Some(&s),
            dst: Some(&d),
            ..Default::default()
        };
        let p = plan_passes(HookPoint::StereoLeftCompositingBlit, 0, &t, ChainOptions::default()).unwrap();
        assert_eq!(p.len(), 1);
        assert!(p[0].1.unwrap().same_target(&d));
    }

    #[test]
    fn passes_alternate_and_end_at_dst() {
        let (s, d, b0, b1) = (fbo(1), fbo(2), fbo(3), fbo(4));
        let t = ChainTargets {
            src1: Some(&s),
            src2: None,
            dst: Some(&d),
            bounce: [Some(&b0), Some(&b1)],
        };
        for n in 1..6 {
            let p = plan_passes(HookPoint::FinalOutputFormattingBlit, n, &t, ChainOptions::default()).unwrap();
            assert_eq!(p.len(), n + 1);
            assert!(p[n].1.unwrap().same_target(&d));
            assert!(p[n - 1].1.unwrap().same_target(&b0));
            for (src, out) in &p {
                assert!(!src.unwrap().same_target(out.unwrap()));
            }
            for w in p.windows(2) {
                assert!(w[1].0.unwrap().same_target(w[0].1.unwrap()));
            }
        }
    }

    #[test]
    fn missing_bounce_buffers_name_the_flag() {
        let (s, d, b0) = (fbo(1), fbo(2), fbo(3));
        let mut t = ChainTargets {
            src1: Some(&s),
            dst: Some(&d),
            ..Default::default()
        };
        let err = plan_passes(HookPoint::StereoCompositingBlit, 1, &t, ChainOptions::default()).unwrap_err();
        assert!(err.to_string().contains("dual-pass"));

        t.bounce[0] = Some(&b0);
        let err = plan_passes(HookPoint::StereoCompositingBlit, 2, &t, ChainOptions::default()).unwrap_err();
        assert!(matches!(err, ImagingError::ChainMismatch { .. }));
        assert!(err.to_string().contains("multi-pass"));
    }

    #[test]
    fn spare_bounce_fallbacks() {
        let (s, d, b0) = (fbo(1), fbo(2), fbo(3));
        let t = ChainTargets {
            src1: Some(&s),
            dst: Some(&d),
            bounce: [Some(&b0), None],
            ..Default::default()
        };
        let swizzle = ChainOptions {
            src_readonly: true,
            allow_swizzle: true,
        };
        let p = plan_passes(HookPoint::StereoLeftCompositingBlit, 2, &t, swizzle).unwrap();
        assert!(p[0].1.unwrap().same_target(&d));

        let writable_src = ChainOptions::default();
        let p = plan_passes(HookPoint::StereoLeftCompositingBlit, 3, &t, writable_src).unwrap();
        assert!(p[0].1.unwrap().same_target(&b0));
        assert!(p[1].1.unwrap().same_target(&s));
        assert!(plan_passes(HookPoint::StereoLeftCompositingBlit, 2, &t, writable_src).is_err());
    }

    #[test]
    fn finalizers_refuse_multi_pass() {
        let d = fbo(2);
        let t = ChainTargets {
            dst: Some(&d),
            ..Default::default()
        };
        assert!(plan_passes(HookPoint::LeftFinalizerBlitChain, 1, &t, ChainOptions::default()).is_err());
    }

    #[test]
    fn ortho_cache_skips_unchanged_sizes() {
        let mut c = RenderStateCache::default();
        assert_eq!(c.last_ortho(), None);
        c.last_ortho = Some((10, 10));
        c.invalidate();
        assert_eq!(c.last_ortho(), None);
    }
}
