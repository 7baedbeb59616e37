//! In-memory `GlDevice` that hands out object names, checks framebuffer
//! completeness against configurable limits and records what it was asked to do.

use std::collections::{HashMap, HashSet};

use stimpipe_core::{FboStatus, GfxCaps, ImagingError, PixelRect};
use stimpipe_runtime::{
    Affine2, Attachment, BlendState, ColorFormat, DepthFormat, DrawBuffer, Filter, GlDevice, StorageFormat,
    TexTarget, TexVertex, Uniform,
};

#[derive(Debug, Clone, PartialEq)]
pub enum DrawKind {
    Quad([TexVertex; 4]),
    Solid { rect: [f32; 4], color: [f32; 4] },
    PixelRow { x: i32, y: i32, pixels: usize },
    List { list: u32, transform: Affine2 },
}

/// One draw, with the state it was issued under.
#[derive(Debug, Clone, PartialEq)]
pub struct Draw {
    pub framebuffer: u32,
    pub program: u32,
    /// Texture bound on unit 0.
    pub source: u32,
    pub kind: DrawKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    BindFramebuffer(u32),
    BindTexture { unit: u32, target: TexTarget, texture: u32 },
    UseProgram(u32),
    Viewport(PixelRect),
    Ortho(i32, i32),
    Scissor(Option<PixelRect>),
    Blend(Option<BlendState>),
    DrawBuffer(DrawBuffer),
    BlitFramebuffer { src: u32, dst: u32, filter: Filter },
    Draw(Draw),
}

#[derive(Debug, Clone, Copy)]
struct Storage {
    format: StorageFormat,
    target: Option<TexTarget>,
    samples: u32,
}

#[derive(Debug, Clone, Copy, Default)]
struct Attachments {
    color: Option<u32>,
    depth: Option<u32>,
    stencil: Option<u32>,
    depth_stencil: Option<u32>,
}

#[derive(Debug)]
pub struct RecordingDevice {
    caps: GfxCaps,
    max_samples: u32,
    /// Highest sample count the driver actually completes, may be below `max_samples`.
    sample_limit: u32,
    renderable: Vec<ColorFormat>,
    packed_depth: bool,
    ms_textures: bool,
    fail_compile: bool,

    next_name: u32,
    textures: HashMap<u32, Storage>,
    renderbuffers: HashMap<u32, Storage>,
    framebuffers: HashMap<u32, Attachments>,
    programs: HashSet<u32>,
    lists: HashMap<u32, usize>,

    bound: u32,
    program: u32,
    units: [u32; 8],
    scissor: Option<PixelRect>,

    pub calls: Vec<Call>,
    /// Every accepted `set_uniform`, in order.
    pub uniforms: Vec<(u32, String, Uniform)>,
}

impl Default for RecordingDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingDevice {
    /// A device that supports everything the pipeline can ask for.
    pub fn new() -> Self {
        Self {
            caps: GfxCaps::all(),
            max_samples: 8,
            sample_limit: 8,
            renderable: vec![
                ColorFormat::Rgba8,
                ColorFormat::Rgba16,
                ColorFormat::Rgba16Snorm,
                ColorFormat::Rgba16F,
                ColorFormat::Rgba32F,
            ],
            packed_depth: true,
            ms_textures: true,
            fail_compile: false,
            next_name: 1,
            textures: HashMap::new(),
            renderbuffers: HashMap::new(),
            framebuffers: HashMap::new(),
            programs: HashSet::new(),
            lists: HashMap::new(),
            bound: 0,
            program: 0,
            units: [0; 8],
            scissor: None,
            calls: Vec::new(),
            uniforms: Vec::new(),
        }
    }

    pub fn without_caps(mut self, caps: GfxCaps) -> Self {
        self.caps.remove(caps);
        self
    }

    pub fn with_max_samples(mut self, n: u32) -> Self {
        self.max_samples = n;
        self.sample_limit = n;
        self
    }

    /// Report `max_samples` but only complete framebuffers with at most `n` samples.
    pub fn with_sample_limit(mut self, n: u32) -> Self {
        self.sample_limit = n;
        self
    }

    pub fn with_renderable(mut self, formats: &[ColorFormat]) -> Self {
        self.renderable = formats.to_vec();
        self
    }

    /// Advertise packed depth-stencil but fail framebuffers that use it.
    pub fn rejecting_packed_depth(mut self) -> Self {
        self.packed_depth = false;
        self
    }

    pub fn rejecting_ms_textures(mut self) -> Self {
        self.ms_textures = false;
        self
    }

    pub fn failing_compiles(mut self) -> Self {
        self.fail_compile = true;
        self
    }

    /// Textures, renderbuffers, framebuffers, programs and geometry lists still alive.
    pub fn live_objects(&self) -> usize {
        self.textures.len() + self.renderbuffers.len() + self.framebuffers.len() + self.programs.len() + self.lists.len()
    }

    pub fn is_texture(&self, name: u32) -> bool {
        self.textures.contains_key(&name)
    }

    pub fn draws(&self) -> Vec<&Draw> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                Call::Draw(d) => Some(d),
                _ => None,
            })
            .collect()
    }

    /// Last value set for `name` on `program`.
    pub fn uniform(&self, program: u32, name: &str) -> Option<&Uniform> {
        self.uniforms
            .iter()
            .rev()
            .find(|(p, n, _)| *p == program && n == name)
            .map(|(_, _, v)| v)
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    fn name(&mut self) -> u32 {
        let n = self.next_name;
        self.next_name += 1;
        n
    }

    fn draw(&mut self, kind: DrawKind) {
        let d = Draw {
            framebuffer: self.bound,
            program: self.program,
            source: self.units[0],
            kind,
        };
        self.calls.push(Call::Draw(d));
    }

    fn status_of(&self, fb: u32) -> FboStatus {
        if fb == 0 {
            return FboStatus::Complete;
        }
        let Some(a) = self.framebuffers.get(&fb) else {
            return FboStatus::Unknown(fb);
        };
        let Some(color) = a.color else {
            return FboStatus::IncompleteMissingAttachment;
        };
        let Some(c) = self.textures.get(&color).or_else(|| self.renderbuffers.get(&color)) else {
            return FboStatus::IncompleteAttachment;
        };
        match c.format {
            StorageFormat::Color(f) if self.renderable.contains(&f) => {}
            StorageFormat::Color(_) => return FboStatus::Unsupported,
            StorageFormat::Depth(_) => return FboStatus::IncompleteAttachment,
        }
        if c.target == Some(TexTarget::Tex2DMultisample) && !self.ms_textures {
            return FboStatus::Unsupported;
        }
        if c.samples > self.sample_limit {
            return FboStatus::IncompleteMultisample;
        }
        for rb in [a.depth, a.stencil, a.depth_stencil].into_iter().flatten() {
            let Some(r) = self.renderbuffers.get(&rb) else {
                return FboStatus::IncompleteAttachment;
            };
            if r.samples != c.samples {
                return FboStatus::IncompleteMultisample;
            }
            if r.format == StorageFormat::Depth(DepthFormat::Depth24Stencil8) && !self.packed_depth {
                return FboStatus::Unsupported;
            }
        }
        FboStatus::Complete
    }
}

impl GlDevice for RecordingDevice {
    fn caps(&self) -> GfxCaps {
        self.caps
    }

    fn max_samples(&self) -> u32 {
        self.max_samples
    }

    fn create_texture(
        &mut self,
        target: TexTarget,
        format: StorageFormat,
        width: i32,
        height: i32,
        samples: u32,
    ) -> Result<u32, ImagingError> {
        if width <= 0 || height <= 0 {
            return Err(ImagingError::GlCreate(format!("texture of size {width}x{height}")));
        }
        let n = self.name();
        self.textures.insert(
            n,
            Storage {
                format,
                target: Some(target),
                samples,
            },
        );
        Ok(n)
    }

    fn create_renderbuffer(
        &mut self,
        format: StorageFormat,
        _width: i32,
        _height: i32,
        samples: u32,
    ) -> Result<u32, ImagingError> {
        let n = self.name();
        self.renderbuffers.insert(
            n,
            Storage {
                format,
                target: None,
                samples,
            },
        );
        Ok(n)
    }

    fn create_framebuffer(&mut self) -> Result<u32, ImagingError> {
        let n = self.name();
        self.framebuffers.insert(n, Attachments::default());
        Ok(n)
    }

    fn delete_texture(&mut self, texture: u32) {
        self.textures.remove(&texture);
    }

    fn delete_renderbuffer(&mut self, renderbuffer: u32) {
        self.renderbuffers.remove(&renderbuffer);
    }

    fn delete_framebuffer(&mut self, framebuffer: u32) {
        self.framebuffers.remove(&framebuffer);
        if self.bound == framebuffer {
            self.bound = 0;
        }
    }

    fn bind_framebuffer(&mut self, framebuffer: u32) {
        self.bound = framebuffer;
        self.calls.push(Call::BindFramebuffer(framebuffer));
    }

    fn bound_framebuffer(&self) -> u32 {
        self.bound
    }

    fn attach_texture(&mut self, attachment: Attachment, _target: TexTarget, texture: u32) {
        self.attach_renderbuffer(attachment, texture);
    }

    fn attach_renderbuffer(&mut self, attachment: Attachment, renderbuffer: u32) {
        let Some(a) = self.framebuffers.get_mut(&self.bound) else {
            return;
        };
        let slot = match attachment {
            Attachment::Color0 => &mut a.color,
            Attachment::Depth => &mut a.depth,
            Attachment::Stencil => &mut a.stencil,
            Attachment::DepthStencil => &mut a.depth_stencil,
        };
        *slot = (renderbuffer != 0).then_some(renderbuffer);
    }

    fn framebuffer_status(&mut self) -> FboStatus {
        self.status_of(self.bound)
    }

    fn set_draw_buffer(&mut self, buffer: DrawBuffer) {
        self.calls.push(Call::DrawBuffer(buffer));
    }

    fn blit_framebuffer(&mut self, src: u32, dst: u32, _src_rect: PixelRect, _dst_rect: PixelRect, filter: Filter) {
        self.calls.push(Call::BlitFramebuffer { src, dst, filter });
    }

    fn bind_texture(&mut self, unit: u32, target: TexTarget, texture: u32) {
        if let Some(u) = self.units.get_mut(unit as usize) {
            *u = texture;
        }
        self.calls.push(Call::BindTexture { unit, target, texture });
    }

    fn set_texture_filter(&mut self, _target: TexTarget, _texture: u32, _filter: Filter) {}

    fn compile_program(&mut self, _vertex: &str, fragment: &str, _geometry: Option<&str>) -> Result<u32, ImagingError> {
        if self.fail_compile {
            return Err(ImagingError::FragmentCompile(format!(
                "0:1: forced failure ({} bytes of source)",
                fragment.len()
            )));
        }
        let n = self.name();
        self.programs.insert(n);
        Ok(n)
    }

    fn delete_program(&mut self, program: u32) {
        self.programs.remove(&program);
    }

    fn use_program(&mut self, program: u32) {
        self.program = program;
        self.calls.push(Call::UseProgram(program));
    }

    fn set_uniform(&mut self, program: u32, name: &str, value: Uniform) -> bool {
        if !self.programs.contains(&program) {
            return false;
        }
        self.uniforms.push((program, name.to_string(), value));
        true
    }

    fn viewport(&mut self, rect: PixelRect) {
        self.calls.push(Call::Viewport(rect));
    }

    fn set_projection_ortho(&mut self, width: i32, height: i32) {
        self.calls.push(Call::Ortho(width, height));
    }

    fn set_scissor(&mut self, rect: Option<PixelRect>) {
        self.scissor = rect;
        self.calls.push(Call::Scissor(rect));
    }

    fn scissor(&self) -> Option<PixelRect> {
        self.scissor
    }

    fn set_blend(&mut self, blend: Option<BlendState>) {
        self.calls.push(Call::Blend(blend));
    }

    fn draw_textured_quad(&mut self, vertices: &[TexVertex; 4], _source: TexTarget) {
        self.draw(DrawKind::Quad(*vertices));
    }

    fn draw_solid_rect(&mut self, rect: [f32; 4], color: [f32; 4]) {
        self.draw(DrawKind::Solid { rect, color });
    }

    fn write_pixel_row(&mut self, x: i32, y: i32, rgb: &[u8]) {
        self.draw(DrawKind::PixelRow {
            x,
            y,
            pixels: rgb.len() / 3,
        });
    }

    fn create_geometry_list(&mut self, vertices: &[TexVertex]) -> Result<u32, ImagingError> {
        if !self.caps.contains(GfxCaps::GEOMETRY_LISTS) {
            return Err(ImagingError::Unsupported("geometry lists".to_string()));
        }
        let n = self.name();
        self.lists.insert(n, vertices.len());
        Ok(n)
    }

    fn draw_geometry_list(&mut self, list: u32, transform: &Affine2) -> Result<(), ImagingError> {
        if !self.lists.contains_key(&list) {
            return Err(ImagingError::Precondition(format!("no geometry list {list}")));
        }
        self.draw(DrawKind::List {
            list,
            transform: *transform,
        });
        Ok(())
    }

    fn delete_geometry_list(&mut self, list: u32) {
        self.lists.remove(&list);
    }
}
