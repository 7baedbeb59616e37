use std::fmt;
use std::sync::Arc;

use stimpipe_core::ImagingError;

use crate::blit_options::BlitOptions;
use crate::hook_point::HookPoint;

/// Scissor rectangle in destination pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScissorRect {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

/// Parameters of the stereo sync line renderer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncLineStyle {
    /// Line height in pixels, counted up from the bottom row.
    pub height: u32,
    pub color: [f32; 3],
}

impl Default for SyncLineStyle {
    fn default() -> Self {
        Self {
            height: 1,
            color: [0.0, 0.0, 1.0],
        }
    }
}

/// Internal operations a built-in entry can select. Resolved from the entry
/// name once, at creation time.
#[derive(Debug, Clone, PartialEq)]
pub enum BuiltinOp {
    IdentityBlit,
    /// Ping-pong marker: swap source and destination before the next entry.
    FlipFBOs,
    /// `None` turns scissoring back off (the `-1:-1:-1:-1` config).
    RestrictToScissorRect(Option<ScissorRect>),
    /// Encode the loaded gamma table into the top scanline for Bits++ boxes.
    RenderClutBitsPlusPlus,
    /// Hand a freshly loaded gamma table to host code (the config string).
    RenderClutViaRuntime,
    RenderStereoSyncLine(SyncLineStyle),
    AlphaPostMultiply,
}

impl BuiltinOp {
    pub fn parse(name: &str, config: &str) -> Result<Self, ImagingError> {
        let bare = name.strip_prefix("Builtin:").unwrap_or(name);
        Ok(match bare {
            "IdentityBlit" => BuiltinOp::IdentityBlit,
            "FlipFBOs" => BuiltinOp::FlipFBOs,
            "RestrictToScissorRect" => BuiltinOp::RestrictToScissorRect(parse_scissor(config)?),
            "RenderClutBits++" => BuiltinOp::RenderClutBitsPlusPlus,
            "RenderClutViaRuntime" => BuiltinOp::RenderClutViaRuntime,
            "RenderStereoSyncLine" => BuiltinOp::RenderStereoSyncLine(parse_sync_line(config)?),
            "AlphaPostMultiply" => BuiltinOp::AlphaPostMultiply,
            _ => return Err(ImagingError::UnknownBuiltin(name.to_string())),
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            BuiltinOp::IdentityBlit => "IdentityBlit",
            BuiltinOp::FlipFBOs => "FlipFBOs",
            BuiltinOp::RestrictToScissorRect(_) => "RestrictToScissorRect",
            BuiltinOp::RenderClutBitsPlusPlus => "RenderClutBits++",
            BuiltinOp::RenderClutViaRuntime => "RenderClutViaRuntime",
            BuiltinOp::RenderStereoSyncLine(_) => "RenderStereoSyncLine",
            BuiltinOp::AlphaPostMultiply => "AlphaPostMultiply",
        }
    }
}

fn parse_scissor(config: &str) -> Result<Option<ScissorRect>, ImagingError> {
    let nums = config
        .split(':')
        .map(|t| t.trim().parse::<i32>())
        .collect::<Result<Vec<_>, _>>()
        .ok()
        .filter(|v| v.len() == 4)
        .ok_or_else(|| ImagingError::BlitConfig {
            config: config.to_string(),
            msg: "scissor rectangle must be 'x:y:w:h'".to_string(),
        })?;
    if nums.iter().all(|&v| v == -1) {
        return Ok(None);
    }
    Ok(Some(ScissorRect {
        x: nums[0],
        y: nums[1],
        w: nums[2],
        h: nums[3],
    }))
}

fn parse_sync_line(config: &str) -> Result<SyncLineStyle, ImagingError> {
    let bad = |msg: &str| ImagingError::BlitConfig {
        config: config.to_string(),
        msg: msg.to_string(),
    };
    let mut style = SyncLineStyle::default();
    if let Some(at) = config.find("Height=") {
        let tok = config[at + "Height=".len()..]
            .split_whitespace()
            .next()
            .unwrap_or("");
        style.height = tok
            .parse::<u32>()
            .ok()
            .filter(|&h| h > 0)
            .ok_or_else(|| bad("Height= expects a positive integer"))?;
    }
    if let Some(at) = config.find("Color=") {
        let rgb = config[at + "Color=".len()..]
            .split_whitespace()
            .take(3)
            .map(|t| t.parse::<f32>().ok())
            .collect::<Option<Vec<_>>>()
            .filter(|v| v.len() == 3)
            .ok_or_else(|| bad("Color= expects three numbers"))?;
        style.color = [rgb[0], rgb[1], rgb[2]];
    }
    Ok(style)
}

/// What a native callback sees when its entry runs.
#[derive(Debug, Clone, Copy)]
pub struct NativeCall<'a> {
    pub hook: HookPoint,
    /// Parameter string after macro expansion.
    pub params: &'a str,
    /// Color texture of the current source buffer, 0 if none.
    pub src_texture: u32,
    /// Framebuffer currently bound as destination, 0 = system framebuffer.
    pub dst_framebuffer: u32,
    pub width: i32,
    pub height: i32,
    pub flip_count: u64,
}

/// Host-supplied function run by a native callback entry. Returning `false`
/// fails the entry.
#[derive(Clone)]
pub struct NativeCallback(Arc<dyn Fn(&NativeCall<'_>) -> bool>);

impl NativeCallback {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&NativeCall<'_>) -> bool + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn call(&self, call: &NativeCall<'_>) -> bool {
        (self.0)(call)
    }

    fn addr(&self) -> *const () {
        Arc::as_ptr(&self.0) as *const ()
    }
}

impl fmt::Debug for NativeCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeCallback({:p})", self.addr())
    }
}

/// Kind tag as it appears in subcommands and insertion descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKindTag {
    Shader,
    NativeFunction,
    RuntimeFunction,
    Builtin,
}

impl EntryKindTag {
    pub const ALL: [EntryKindTag; 4] = [
        EntryKindTag::Shader,
        EntryKindTag::NativeFunction,
        EntryKindTag::RuntimeFunction,
        EntryKindTag::Builtin,
    ];

    pub fn name(self) -> &'static str {
        match self {
            EntryKindTag::Shader => "Shader",
            EntryKindTag::NativeFunction => "NativeFunction",
            EntryKindTag::RuntimeFunction => "RuntimeFunction",
            EntryKindTag::Builtin => "Builtin",
        }
    }

    pub fn from_name(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.name() == s)
    }
}

/// Payload of one chain slot. Exactly one kind per entry.
#[derive(Debug, Clone)]
pub enum HookKind {
    Shader {
        program: u32,
        /// Blit configuration as given, kept for query and dump.
        config: String,
        blit: BlitOptions,
        /// Lookup texture bound to unit 2, 0 = none.
        lut_texture: u32,
    },
    NativeCallback {
        callback: NativeCallback,
        params: String,
    },
    RuntimeCallback {
        eval: String,
    },
    Builtin {
        op: BuiltinOp,
        config: String,
    },
}

impl HookKind {
    pub fn shader(program: u32, config: &str, lut_texture: u32) -> Result<Self, ImagingError> {
        Ok(HookKind::Shader {
            program,
            config: config.to_string(),
            blit: BlitOptions::parse(config)?,
            lut_texture,
        })
    }

    pub fn native(callback: NativeCallback, params: &str) -> Self {
        HookKind::NativeCallback {
            callback,
            params: params.to_string(),
        }
    }

    pub fn runtime(eval: &str) -> Self {
        HookKind::RuntimeCallback {
            eval: eval.to_string(),
        }
    }

    /// Built-ins are named like `Builtin:IdentityBlit`; the prefix is optional.
    pub fn builtin(name: &str, config: &str) -> Result<Self, ImagingError> {
        Ok(HookKind::Builtin {
            op: BuiltinOp::parse(name, config)?,
            config: config.to_string(),
        })
    }

    pub fn tag(&self) -> EntryKindTag {
        match self {
            HookKind::Shader { .. } => EntryKindTag::Shader,
            HookKind::NativeCallback { .. } => EntryKindTag::NativeFunction,
            HookKind::RuntimeCallback { .. } => EntryKindTag::RuntimeFunction,
            HookKind::Builtin { .. } => EntryKindTag::Builtin,
        }
    }

    pub fn is_ping_pong_marker(&self) -> bool {
        matches!(
            self,
            HookKind::Builtin {
                op: BuiltinOp::FlipFBOs,
                ..
            }
        )
    }

    /// The configuration-like string of this kind: blit config, callback
    /// parameters, eval string or built-in config.
    pub fn config_str(&self) -> &str {
        match self {
            HookKind::Shader { config, .. } => config,
            HookKind::NativeCallback { params, .. } => params,
            HookKind::RuntimeCallback { eval } => eval,
            HookKind::Builtin { config, .. } => config,
        }
    }

    /// Replace the configuration string, re-parsing it where the kind caches
    /// a parsed form. On error the entry keeps its previous configuration.
    pub fn set_config(&mut self, new: &str) -> Result<(), ImagingError> {
        match self {
            HookKind::Shader { config, blit, .. } => {
                *blit = BlitOptions::parse(new)?;
                *config = new.to_string();
            }
            HookKind::NativeCallback { params, .. } => *params = new.to_string(),
            HookKind::RuntimeCallback { eval } => *eval = new.to_string(),
            HookKind::Builtin { op, config } => {
                *op = BuiltinOp::parse(op.name(), new)?;
                *config = new.to_string();
            }
        }
        Ok(())
    }
}

/// One node of a hook chain.
#[derive(Debug, Clone)]
pub struct HookEntry {
    pub name: String,
    pub kind: HookKind,
}

impl HookEntry {
    pub fn new(name: impl Into<String>, kind: HookKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    /// One-line payload summary used by dumps.
    pub fn summary(&self) -> String {
        match &self.kind {
            HookKind::Shader {
                program,
                config,
                lut_texture,
                ..
            } => format!(
                "GLSL shader: program={program} lut={lut_texture} blitter='{config}'"
            ),
            HookKind::NativeCallback { callback, params } => {
                format!("native function: {:p} params='{params}'", callback.addr())
            }
            HookKind::RuntimeCallback { eval } => format!("runtime function: '{eval}'"),
            HookKind::Builtin { op, config } => {
                format!("builtin: {} config='{config}'", op.name())
            }
        }
    }
}
