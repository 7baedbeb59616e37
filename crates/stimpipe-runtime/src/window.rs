//! Per-window pipeline state and its lifecycle: defaults at window creation,
//! configuration at window open, two-phase shutdown at close.

use std::fmt;

use stimpipe_core::{ImagingError, ImagingMode, PipelineConfig, WindowInfo};
use stimpipe_hooks::{list_all_hooks, EntryKindTag, HookChains, HookCommand, HookKind, HookPoint, InsertPosition, NativeCallback};
use tracing::{debug, error, warn};

use crate::blitter::Blitter;
use crate::configure::{configure_pipeline, PipelineLayout};
use crate::device::GlDevice;
use crate::executor::{execute_non_gl_chain, ChainOptions, ChainTargets, Executor, RenderStateCache};
use crate::fbo::Fbo;
use crate::host::{GammaState, GammaTable, HostRuntime, NoHostRuntime};
use crate::shaders::ShaderCache;
use crate::table::FboTable;
use crate::texture::{self, TextureRecord};

/// Chain buffers named by FBO table slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlotTargets {
    pub src1: Option<usize>,
    pub src2: Option<usize>,
    pub dst: Option<usize>,
    pub bounce: [Option<usize>; 2],
}

/// Answer of [`ImagingWindow::hook_command`].
#[derive(Debug, Clone, PartialEq)]
pub enum CommandReply {
    Done,
    /// Index of the added or edited slot.
    Slot(usize),
    Query {
        descriptor: String,
        name: String,
        payload: String,
    },
    NotFound,
    Text(String),
    /// Imaging mode before the command ran.
    Mode(ImagingMode),
}

/// The imaging pipeline of one onscreen window.
pub struct ImagingWindow<D: GlDevice> {
    pub(crate) dev: D,
    pub(crate) info: WindowInfo,
    pub(crate) config: PipelineConfig,
    pub(crate) layout: Option<PipelineLayout>,
    pub(crate) fbos: FboTable,
    pub(crate) hooks: HookChains,
    pub(crate) shaders: ShaderCache,
    pub(crate) state: RenderStateCache,
    pub(crate) host: Box<dyn HostRuntime>,
    pub(crate) gamma: GammaState,
    pub(crate) flip_count: u64,
    /// Imaging mode of a proxy window, used by offline transforms.
    proxy_mode: ImagingMode,
    gl_alive: bool,
}

impl<D: GlDevice> fmt::Debug for ImagingWindow<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImagingWindow")
            .field("info", &self.info)
            .field("layout", &self.layout)
            .field("fbos", &self.fbos.allocated())
            .field("flip_count", &self.flip_count)
            .field("gl_alive", &self.gl_alive)
            .finish_non_exhaustive()
    }
}

impl<D: GlDevice> ImagingWindow<D> {
    /// Window record with the pipeline entirely off.
    pub fn new(dev: D, info: WindowInfo) -> Self {
        let fbos = FboTable::new(info.width, info.height);
        Self {
            dev,
            info,
            config: PipelineConfig::default(),
            layout: None,
            fbos,
            hooks: HookChains::new(),
            shaders: ShaderCache::new(),
            state: RenderStateCache::default(),
            host: Box::new(NoHostRuntime),
            gamma: GammaState::default(),
            flip_count: 0,
            proxy_mode: ImagingMode::empty(),
            gl_alive: true,
        }
    }

    /// Configure the pipeline. A previous configuration is torn down first;
    /// on failure nothing is left allocated.
    pub fn configure(&mut self, config: PipelineConfig) -> Result<&PipelineLayout, ImagingError> {
        if !self.gl_alive {
            return Err(ImagingError::Precondition(
                "cannot configure a window whose GL context is gone".to_string(),
            ));
        }
        if self.layout.is_some() {
            self.release_gl_resources();
            self.hooks.reset_all();
        }
        self.config = config;
        match configure_pipeline(
            &mut self.dev,
            &self.info,
            &self.config,
            &mut self.fbos,
            &mut self.hooks,
            &mut self.shaders,
        ) {
            Ok(layout) => Ok(self.layout.insert(layout)),
            Err(e) => {
                error!(%e, "imaging pipeline setup failed");
                self.release_gl_resources();
                self.hooks.reset_all();
                Err(e)
            }
        }
    }

    pub fn is_configured(&self) -> bool {
        self.layout.is_some()
    }

    pub fn layout(&self) -> Option<&PipelineLayout> {
        self.layout.as_ref()
    }

    /// Effective imaging mode: the configured one, else the proxy override.
    pub fn imaging_mode(&self) -> ImagingMode {
        self.layout.as_ref().map_or(self.proxy_mode, |l| l.mode)
    }

    /// Override the imaging mode of an unconfigured proxy window. Returns the previous mode.
    pub fn set_imaging_mode(&mut self, mode: ImagingMode) -> Result<ImagingMode, ImagingError> {
        if self.layout.is_some() {
            return Err(ImagingError::Precondition(
                "imaging mode of a configured onscreen window is fixed".to_string(),
            ));
        }
        Ok(std::mem::replace(&mut self.proxy_mode, mode))
    }

    pub fn info(&self) -> &WindowInfo {
        &self.info
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn fbos(&self) -> &FboTable {
        &self.fbos
    }

    pub fn hooks(&self) -> &HookChains {
        &self.hooks
    }

    pub fn hooks_mut(&mut self) -> &mut HookChains {
        &mut self.hooks
    }

    pub fn device(&self) -> &D {
        &self.dev
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.dev
    }

    pub fn shaders(&self) -> &ShaderCache {
        &self.shaders
    }

    pub fn flip_count(&self) -> u64 {
        self.flip_count
    }

    pub fn gamma(&self) -> &GammaState {
        &self.gamma
    }

    /// Hand over a freshly loaded gamma table for the CLUT encoders.
    pub fn set_pending_gamma_table(&mut self, table: GammaTable) {
        self.gamma.set(table);
    }

    pub fn set_host_runtime(&mut self, host: Box<dyn HostRuntime>) {
        self.host = host;
    }

    /// Final output buffer of one stream.
    pub fn finalized_buffer(&self, eye: usize) -> Option<&Fbo> {
        self.fbos.role(*self.fbos.finalized.get(eye)?)
    }

    pub(crate) fn executor(&mut self) -> Executor<'_, D> {
        Executor {
            dev: &mut self.dev,
            chains: &self.hooks,
            shaders: &mut self.shaders,
            state: &mut self.state,
            host: &mut *self.host,
            gamma: &mut self.gamma,
            flip_count: self.flip_count,
            trace: self.config.traces_frames(),
        }
    }

    /// Run one hook chain over FBO table slots.
    pub fn execute_hook(
        &mut self,
        hook: HookPoint,
        slots: SlotTargets,
        opts: ChainOptions,
        blitter: Option<&mut dyn Blitter<D>>,
    ) -> Result<(), ImagingError> {
        if self.layout.is_none() {
            return Err(ImagingError::Precondition("imaging pipeline is not configured".to_string()));
        }
        if hook.is_non_gl() {
            return execute_non_gl_chain(&self.hooks, hook, &mut *self.host, &self.gamma, self.flip_count);
        }
        let fbos = &self.fbos;
        let slot = |s: Option<usize>| -> Result<Option<&Fbo>, ImagingError> {
            match s {
                None => Ok(None),
                Some(i) => fbos
                    .get(i)
                    .map(Some)
                    .ok_or_else(|| ImagingError::Precondition(format!("no FBO in slot {i}"))),
            }
        };
        let targets = ChainTargets {
            src1: slot(slots.src1)?,
            src2: slot(slots.src2)?,
            dst: slot(slots.dst)?,
            bounce: [slot(slots.bounce[0])?, slot(slots.bounce[1])?],
        };
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
        exec.execute_chain(hook, &targets, opts, blitter)
    }

    /// Render `src` into `dst` through the `UserDefinedBlit` chain.
    pub fn transform_texture(&mut self, src: &mut TextureRecord, dst: &mut TextureRecord) -> Result<(), ImagingError> {
        let mode = self.imaging_mode();
        let warns = self.config.warns();
        let mut exec = self.executor();
        texture::transform_texture(&mut exec, mode, src, dst, warns)
    }

    /// Re-render a foreign texture upright and interleaved. See
    /// [`texture::normalize_texture_orientation`].
    pub fn normalize_texture(&mut self, tex: &mut TextureRecord) -> Result<Option<u32>, ImagingError> {
        let warns = self.config.warns();
        texture::normalize_texture_orientation(&mut self.dev, &mut self.shaders, &mut self.state, tex, warns)
    }

    /// Apply one textual hook subcommand, e.g. `("AppendBuiltin",
    /// "StereoLeftCompositingBlit", ["FlipFBOs"])`.
    ///
    /// Argument lists by command: Shader `[name, program, config?, lut?]`,
    /// RuntimeFunction `[name, code]`, Builtin `[op, config?]`, Remove
    /// `[index]`, Query `[token]`, Edit `[token, config]`, ImagingMode
    /// `[mode?]`. Native callbacks are added with [`Self::add_native_hook`].
    pub fn hook_command(&mut self, command: &str, hook: &str, args: &[&str]) -> Result<CommandReply, ImagingError> {
        let cmd = HookCommand::parse(command)?;
        match cmd {
            HookCommand::ListAll => return Ok(CommandReply::Text(list_all_hooks())),
            HookCommand::DumpAll => return Ok(CommandReply::Text(self.hooks.dump_all())),
            HookCommand::ImagingMode => {
                let old = self.imaging_mode();
                if let Some(v) = args.first() {
                    let bits = v
                        .trim()
                        .parse::<u32>()
                        .map_err(|_| ImagingError::other(format!("imaging mode '{v}' is not a number")))?;
                    self.set_imaging_mode(ImagingMode::from_bits_retain(bits))?;
                }
                return Ok(CommandReply::Mode(old));
            }
            _ => {}
        }

        let point = HookPoint::from_name(hook)?;
        let arg = |i: usize| -> Result<&str, ImagingError> {
            args.get(i)
                .copied()
                .ok_or_else(|| ImagingError::other(format!("'{command}' is missing argument {}", i + 1)))
        };
        Ok(match cmd {
            HookCommand::Add { position, kind } => {
                let (name, kind) = match kind {
                    EntryKindTag::Shader => {
                        let program = parse_handle(arg(1)?)?;
                        let lut = args.get(3).map(|s| parse_handle(s)).transpose()?.unwrap_or(0);
                        (arg(0)?, HookKind::shader(program, args.get(2).copied().unwrap_or(""), lut)?)
                    }
                    EntryKindTag::RuntimeFunction => (arg(0)?, HookKind::runtime(arg(1)?)),
                    EntryKindTag::Builtin => {
                        let op = arg(0)?;
                        (op, HookKind::builtin(op, args.get(1).copied().unwrap_or(""))?)
                    }
                    EntryKindTag::NativeFunction => {
                        return Err(ImagingError::Unsupported(
                            "native functions cannot be added by name".to_string(),
                        ))
                    }
                };
                let at = self.hooks.add_entry(point, name, position, kind);
                debug!(hook = %point, slot = at, "hook entry added");
                CommandReply::Slot(at)
            }
            HookCommand::Remove => {
                let index = arg(0)?
                    .trim()
                    .parse::<usize>()
                    .map_err(|_| ImagingError::other("Remove needs a slot index"))?;
                self.hooks.remove_entry(point, index);
                CommandReply::Done
            }
            HookCommand::Reset => {
                self.hooks.reset(point);
                CommandReply::Done
            }
            HookCommand::Enable => {
                self.hooks.enable(point);
                CommandReply::Done
            }
            HookCommand::Disable => {
                self.hooks.disable(point);
                CommandReply::Done
            }
            HookCommand::Query => match self.hooks.query(point, arg(0)?) {
                Some(slot) => CommandReply::Query {
                    descriptor: slot.insert_descriptor(),
                    name: slot.entry.name.clone(),
                    payload: slot.entry.summary(),
                },
                None => CommandReply::NotFound,
            },
            HookCommand::Edit => CommandReply::Slot(self.hooks.edit_entry(point, arg(0)?, arg(1)?)?),
            HookCommand::Dump => CommandReply::Text(self.hooks.dump(point)),
            HookCommand::ListAll | HookCommand::DumpAll | HookCommand::ImagingMode => CommandReply::Done,
        })
    }

    pub fn add_native_hook(
        &mut self,
        hook: HookPoint,
        name: &str,
        position: InsertPosition,
        callback: NativeCallback,
        params: &str,
    ) -> usize {
        self.hooks.add_entry(hook, name, position, HookKind::native(callback, params))
    }

    /// Two-phase shutdown entry point: GL teardown while the context is
    /// still valid, bookkeeping after it is gone. Call with `true`, then `false`.
    pub fn shutdown_pipeline(&mut self, gl_context_valid: bool) -> Result<(), ImagingError> {
        if gl_context_valid {
            self.shutdown_gl()
        } else {
            self.shutdown_bookkeeping()
        }
    }

    /// Run the pre-shutdown chain, then free every GL object.
    pub fn shutdown_gl(&mut self) -> Result<(), ImagingError> {
        if !self.gl_alive {
            return Ok(());
        }
        let ran = if self.layout.is_some() {
            let system = self.fbos.system().clone();
            let targets = ChainTargets {
                dst: Some(&system),
                ..Default::default()
            };
            self.executor().execute_chain(
                HookPoint::CloseOnscreenWindowPreGLShutdown,
                &targets,
                ChainOptions::default(),
                None,
            )
        } else {
            Ok(())
        };
        if let Err(e) = &ran {
            warn!(%e, "pre-shutdown hook chain failed; freeing GL resources anyway");
        }
        self.release_gl_resources();
        self.gl_alive = false;
        ran
    }

    /// Run the post-shutdown chain and forget all hook chains.
    pub fn shutdown_bookkeeping(&mut self) -> Result<(), ImagingError> {
        if self.gl_alive && self.layout.is_some() {
            return Err(ImagingError::Precondition(
                "GL teardown must run before bookkeeping teardown".to_string(),
            ));
        }
        let ran = execute_non_gl_chain(
            &self.hooks,
            HookPoint::CloseOnscreenWindowPostGLShutdown,
            &mut *self.host,
            &self.gamma,
            self.flip_count,
        );
        self.hooks.reset_all();
        self.layout = None;
        self.gamma = GammaState::default();
        ran
    }

    fn release_gl_resources(&mut self) {
        self.fbos.destroy(&mut self.dev);
        self.shaders.clear(&mut self.dev);
        self.state.invalidate();
    }
}

fn parse_handle(s: &str) -> Result<u32, ImagingError> {
    s.trim()
        .parse::<u32>()
        .map_err(|_| ImagingError::other(format!("'{s}' is not a GL object name")))
}
