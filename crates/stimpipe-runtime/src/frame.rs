//! Per-frame stage driver: runs the hook chains of one flip in pipeline order.

use stimpipe_core::{ImagingError, ImagingMode, StereoMode};
use stimpipe_hooks::HookPoint;
use tracing::trace;

use crate::device::{DrawBuffer, Filter, GlDevice};
use crate::executor::{execute_non_gl_chain, ChainOptions, ChainTargets, Executor};
use crate::fbo::Fbo;
use crate::table::FboTable;
use crate::window::ImagingWindow;

/// What happened during one [`ImagingWindow::process_frame`].
#[derive(Debug, Default)]
pub struct FrameReport {
    /// Flip counter after this frame.
    pub flip_count: u64,
    /// Hook chains that ran, in order. Identity fallbacks show up as
    /// `IdentityBlitChain`.
    pub stages: Vec<HookPoint>,
    /// Per-entry failures; each cost the rest of one chain, not the frame.
    pub failures: Vec<ImagingError>,
}

impl FrameReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// One buffer-to-buffer stage of the frame.
struct Stage<'f> {
    hook: HookPoint,
    src1: Option<usize>,
    src2: Option<usize>,
    dst: Option<usize>,
    bounce: [Option<usize>; 2],
    opts: ChainOptions,
    fbos: &'f FboTable,
}

impl<'f> Stage<'f> {
    fn targets(&self) -> ChainTargets<'f> {
        ChainTargets {
            src1: self.fbos.role(self.src1),
            src2: self.fbos.role(self.src2),
            dst: self.fbos.role(self.dst),
            bounce: [self.fbos.role(self.bounce[0]), self.fbos.role(self.bounce[1])],
        }
    }
}

fn record(report: &mut FrameReport, hook: HookPoint, ran: Result<(), ImagingError>) -> Result<(), ImagingError> {
    match ran {
        Ok(()) => {
            report.stages.push(hook);
            Ok(())
        }
        Err(e) if !e.is_fatal() => {
            report.failures.push(e);
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Run a stage chain. An aliased stage (same slot in and out) is skipped; a
/// stage whose chain is not operational copies through `IdentityBlitChain`.
fn run_stage<D: GlDevice>(
    exec: &mut Executor<'_, D>,
    report: &mut FrameReport,
    stage: &Stage<'_>,
) -> Result<(), ImagingError> {
    if stage.src1.is_some() && stage.src1 == stage.dst {
        return Ok(());
    }
    let targets = stage.targets();
    if exec.chains.is_operational(stage.hook) {
        let ran = exec.execute_chain(stage.hook, &targets, stage.opts, None);
        return record(report, stage.hook, ran);
    }
    if stage.src1.is_none() {
        return Ok(());
    }
    let copy = ChainTargets {
        bounce: [None, None],
        src2: None,
        ..targets
    };
    let ran = exec.execute_chain(HookPoint::IdentityBlitChain, &copy, ChainOptions::default(), None);
    if exec.chains.is_operational(HookPoint::IdentityBlitChain) {
        record(report, HookPoint::IdentityBlitChain, ran)
    } else {
        ran
    }
}

/// Run a chain in place on one buffer, if it is operational.
fn run_in_place<D: GlDevice>(
    exec: &mut Executor<'_, D>,
    report: &mut FrameReport,
    hook: HookPoint,
    buffer: Option<&Fbo>,
) -> Result<(), ImagingError> {
    if !exec.chains.is_operational(hook) {
        return Ok(());
    }
    let targets = ChainTargets {
        src1: buffer,
        dst: buffer,
        ..Default::default()
    };
    let ran = exec.execute_chain(hook, &targets, ChainOptions::default(), None);
    record(report, hook, ran)
}

fn select_eye<D: GlDevice>(dev: &mut D, stereo: StereoMode, eye: usize) {
    if stereo == StereoMode::OpenGl {
        dev.set_draw_buffer(if eye == 0 { DrawBuffer::BackLeft } else { DrawBuffer::BackRight });
    }
}

impl<D: GlDevice> ImagingWindow<D> {
    /// Bind the draw buffer of `view` and run `UserspaceBufferDrawingPrepare`.
    pub fn begin_view(&mut self, view: usize) -> Result<(), ImagingError> {
        let slot = self
            .fbos
            .draw
            .get(view)
            .copied()
            .flatten()
            .ok_or_else(|| ImagingError::Precondition(format!("window has no draw buffer for view {view}")))?;
        let fbos = &self.fbos;
        let dst = fbos.get(slot);
        let mut exec = Executor {
            dev: &mut self.dev,
            chains: &self.hooks,
            shaders: &mut self.shaders,
            state: &mut self.state,
            host: &mut *self.host,
            gamma: &mut self.gamma,
            flip_count: self.flip_count,
            trace: self.config.traces_frames(),
        };
        if let Some(d) = dst {
            exec.dev.bind_framebuffer(d.framebuffer);
            exec.dev.viewport(d.rect());
            exec.state.ensure_ortho(exec.dev, d.width, d.height);
        }
        let targets = ChainTargets {
            dst,
            ..Default::default()
        };
        exec.execute_chain(
            HookPoint::UserspaceBufferDrawingPrepare,
            &targets,
            ChainOptions::default(),
            None,
        )
    }

    /// Turn the user's draw buffers into the finalized output of one flip.
    ///
    /// Stage order: drawing finished, multisample resolve / panel fit,
    /// per-eye processing, stereo merge, output formatting, finalizers,
    /// pre-swap operations. The flip counter is bumped even when an entry
    /// failed; only fatal errors abort the frame.
    pub fn process_frame(&mut self) -> Result<FrameReport, ImagingError> {
        let layout = self
            .layout
            .clone()
            .ok_or_else(|| ImagingError::Precondition("imaging pipeline is not configured".to_string()))?;
        let mode = layout.mode;
        let stereo = self.info.stereo;
        let views = self.info.view_count();
        let fbos = &self.fbos;
        let mut report = FrameReport::default();
        let mut exec = Executor {
            dev: &mut self.dev,
            chains: &self.hooks,
            shaders: &mut self.shaders,
            state: &mut self.state,
            host: &mut *self.host,
            gamma: &mut self.gamma,
            flip_count: self.flip_count,
            trace: self.config.traces_frames(),
        };
        let saved_fb = exec.dev.bound_framebuffer();

        for v in 0..views {
            let targets = ChainTargets {
                dst: fbos.role(fbos.draw[v]),
                ..Default::default()
            };
            if exec.chains.is_operational(HookPoint::UserspaceBufferDrawingFinished) {
                let ran = exec.execute_chain(
                    HookPoint::UserspaceBufferDrawingFinished,
                    &targets,
                    ChainOptions::default(),
                    None,
                );
                record(&mut report, HookPoint::UserspaceBufferDrawingFinished, ran)?;
            }
        }

        let filter = if layout.panel_fitter.is_some() {
            Filter::Linear
        } else {
            Filter::Nearest
        };
        for v in 0..views {
            if fbos.draw[v] == fbos.input[v] {
                continue;
            }
            if let (Some(d), Some(i)) = (fbos.role(fbos.draw[v]), fbos.role(fbos.input[v])) {
                exec.dev.blit_framebuffer(d.framebuffer, i.framebuffer, d.rect(), i.rect(), filter);
            }
        }

        let other_stream = mode.contains(ImagingMode::NEED_OTHER_STREAM_INPUT) && views == 2;
        for v in 0..views {
            let hook = if v == 0 {
                HookPoint::StereoLeftCompositingBlit
            } else {
                HookPoint::StereoRightCompositingBlit
            };
            let stage = Stage {
                hook,
                src1: fbos.input[v],
                src2: if other_stream { fbos.input[1 - v] } else { None },
                dst: fbos.processed[v],
                bounce: [fbos.processed[2], None],
                opts: ChainOptions {
                    src_readonly: fbos.input[v] == fbos.draw[v],
                    allow_swizzle: true,
                },
                fbos,
            };
            run_stage(&mut exec, &mut report, &stage)?;
        }

        if stereo.needs_merge() {
            let stage = Stage {
                hook: HookPoint::StereoCompositingBlit,
                src1: fbos.processed[0],
                src2: fbos.processed[1],
                dst: fbos.pre_conversion[0],
                bounce: [fbos.pre_conversion[2], fbos.pre_conversion[3]],
                opts: ChainOptions {
                    src_readonly: true,
                    allow_swizzle: false,
                },
                fbos,
            };
            run_stage(&mut exec, &mut report, &stage)?;
        }

        let dual_output = stereo.needs_finalized_fbos() || mode.contains(ImagingMode::NEED_DUAL_WINDOW_OUTPUT);
        let streams = if dual_output || stereo == StereoMode::OpenGl { 2 } else { 1 };
        for eye in 0..streams {
            let src = fbos.pre_conversion[eye].or(fbos.pre_conversion[0]);
            let hook = match (dual_output, eye) {
                (true, 0) => HookPoint::FinalOutputFormattingBlit0,
                (true, _) => HookPoint::FinalOutputFormattingBlit1,
                (false, _) => HookPoint::FinalOutputFormattingBlit,
            };
            let stage = Stage {
                hook,
                src1: src,
                src2: None,
                dst: fbos.finalized[eye],
                bounce: [fbos.pre_conversion[2], fbos.pre_conversion[3]],
                opts: ChainOptions {
                    src_readonly: fbos.draw.contains(&src),
                    allow_swizzle: false,
                },
                fbos,
            };
            select_eye(exec.dev, stereo, eye);
            run_stage(&mut exec, &mut report, &stage)?;
        }

        for eye in 0..streams {
            let hook = if eye == 0 {
                HookPoint::LeftFinalizerBlitChain
            } else {
                HookPoint::RightFinalizerBlitChain
            };
            select_eye(exec.dev, stereo, eye);
            run_in_place(&mut exec, &mut report, hook, fbos.role(fbos.finalized[eye]))?;
        }

        if stereo == StereoMode::OpenGl {
            exec.dev.set_draw_buffer(DrawBuffer::Back);
        }
        run_in_place(&mut exec, &mut report, HookPoint::PreSwapbuffersOperations, Some(fbos.system()))?;
        exec.dev.bind_framebuffer(saved_fb);

        self.flip_count += 1;
        report.flip_count = self.flip_count;
        if self.config.traces_frames() {
            trace!(flip = self.flip_count, stages = ?report.stages, failures = report.failures.len(), "frame processed");
        }
        Ok(report)
    }

    /// Run `ScreenFlipImpliedOperations` after the buffer swap. Needs no GL.
    pub fn after_flip(&mut self) -> Result<(), ImagingError> {
        execute_non_gl_chain(
            &self.hooks,
            HookPoint::ScreenFlipImpliedOperations,
            &mut *self.host,
            &self.gamma,
            self.flip_count,
        )
    }
}
