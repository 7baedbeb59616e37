//! stimpipe runtime (glow/OpenGL backend)
//
// This crate contains only the `GlDevice` implementation over an OpenGL 3.3
// core context. Window and context creation belong to the host.
#![allow(clippy::missing_safety_doc)]
#![deny(missing_debug_implementations)]

use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroU32;

use glow::HasContext;
use stimpipe_core::{FboStatus, GfxCaps, ImagingError, PixelRect};
use stimpipe_runtime::device::{
    Affine2, Attachment, BlendFactor, BlendState, ColorFormat, DepthFormat, DrawBuffer, Filter, GlDevice,
    StorageFormat, TexTarget, TexVertex, Uniform,
};
use tracing::debug;

pub mod programs;

use programs::{compile_program, default_program, QUAD_2D_FRAG, QUAD_RECT_FRAG, SOLID_FRAG};

/// Texture unit used for filter changes so pipeline bindings stay intact.
const SCRATCH_UNIT: u32 = 7;

fn gl_id(name: u32) -> Option<NonZeroU32> {
    NonZeroU32::new(name)
}

fn texture(name: u32) -> Option<glow::NativeTexture> {
    gl_id(name).map(glow::NativeTexture)
}

fn framebuffer(name: u32) -> Option<glow::NativeFramebuffer> {
    gl_id(name).map(glow::NativeFramebuffer)
}

fn renderbuffer(name: u32) -> Option<glow::NativeRenderbuffer> {
    gl_id(name).map(glow::NativeRenderbuffer)
}

fn program(name: u32) -> Option<glow::NativeProgram> {
    gl_id(name).map(glow::NativeProgram)
}

fn tex_target(t: TexTarget) -> u32 {
    match t {
        TexTarget::Tex1D => glow::TEXTURE_1D,
        TexTarget::Tex2D => glow::TEXTURE_2D,
        TexTarget::Rect => glow::TEXTURE_RECTANGLE,
        TexTarget::Tex3D => glow::TEXTURE_3D,
        TexTarget::Tex2DMultisample => glow::TEXTURE_2D_MULTISAMPLE,
    }
}

/// (internal format, pixel format, pixel type)
fn storage(format: StorageFormat) -> (u32, u32, u32) {
    match format {
        StorageFormat::Color(ColorFormat::Rgba8) => (glow::RGBA8, glow::RGBA, glow::UNSIGNED_BYTE),
        StorageFormat::Color(ColorFormat::Rgba16) => (glow::RGBA16, glow::RGBA, glow::UNSIGNED_SHORT),
        StorageFormat::Color(ColorFormat::Rgba16Snorm) => (glow::RGBA16_SNORM, glow::RGBA, glow::SHORT),
        StorageFormat::Color(ColorFormat::Rgba16F) => (glow::RGBA16F, glow::RGBA, glow::HALF_FLOAT),
        StorageFormat::Color(ColorFormat::Rgba32F) => (glow::RGBA32F, glow::RGBA, glow::FLOAT),
        StorageFormat::Depth(DepthFormat::Depth24Stencil8) => {
            (glow::DEPTH24_STENCIL8, glow::DEPTH_STENCIL, glow::UNSIGNED_INT_24_8)
        }
        StorageFormat::Depth(DepthFormat::Depth24) => (glow::DEPTH_COMPONENT24, glow::DEPTH_COMPONENT, glow::UNSIGNED_INT),
        StorageFormat::Depth(DepthFormat::Depth16) => (glow::DEPTH_COMPONENT16, glow::DEPTH_COMPONENT, glow::UNSIGNED_SHORT),
        StorageFormat::Depth(DepthFormat::Stencil8) => (glow::STENCIL_INDEX8, glow::STENCIL_INDEX, glow::UNSIGNED_BYTE),
    }
}

fn blend_factor(f: BlendFactor) -> u32 {
    match f {
        BlendFactor::Zero => glow::ZERO,
        BlendFactor::One => glow::ONE,
        BlendFactor::SrcAlpha => glow::SRC_ALPHA,
        BlendFactor::OneMinusSrcAlpha => glow::ONE_MINUS_SRC_ALPHA,
        BlendFactor::DstAlpha => glow::DST_ALPHA,
    }
}

fn status(raw: u32) -> FboStatus {
    match raw {
        glow::FRAMEBUFFER_COMPLETE => FboStatus::Complete,
        glow::FRAMEBUFFER_UNSUPPORTED => FboStatus::Unsupported,
        glow::FRAMEBUFFER_INCOMPLETE_ATTACHMENT => FboStatus::IncompleteAttachment,
        glow::FRAMEBUFFER_INCOMPLETE_MISSING_ATTACHMENT => FboStatus::IncompleteMissingAttachment,
        glow::FRAMEBUFFER_INCOMPLETE_MULTISAMPLE => FboStatus::IncompleteMultisample,
        other => FboStatus::Unknown(other),
    }
}

/// Column-major orthographic projection, y down, origin top-left.
fn ortho(width: i32, height: i32) -> [f32; 16] {
    let (w, h) = (width.max(1) as f32, height.max(1) as f32);
    [
        2.0 / w, 0.0, 0.0, 0.0, //
        0.0, -2.0 / h, 0.0, 0.0, //
        0.0, 0.0, -1.0, 0.0, //
        -1.0, 1.0, 0.0, 1.0,
    ]
}

/// `projection * affine`, both column-major 4x4.
fn with_affine(projection: &[f32; 16], m: &Affine2) -> [f32; 16] {
    let a = &m.0;
    let affine = [
        a[0], a[3], 0.0, 0.0, //
        a[1], a[4], 0.0, 0.0, //
        0.0, 0.0, 1.0, 0.0, //
        a[2], a[5], 0.0, 1.0,
    ];
    let mut out = [0.0; 16];
    for col in 0..4 {
        for row in 0..4 {
            out[col * 4 + row] = (0..4).map(|k| projection[k * 4 + row] * affine[col * 4 + k]).sum();
        }
    }
    out
}

fn caps_from(version: &glow::Version, extensions: &std::collections::HashSet<String>, stereo: bool) -> GfxCaps {
    let at_least = |major: u32, minor: u32| (version.major, version.minor) >= (major, minor);
    let has = |name: &str| extensions.contains(name);
    let mut caps = GfxCaps::GEOMETRY_LISTS;
    if at_least(3, 0) || has("GL_ARB_framebuffer_object") {
        caps |= GfxCaps::FBO
            | GfxCaps::FBO_BLIT
            | GfxCaps::FBO_MULTISAMPLE
            | GfxCaps::PACKED_DEPTH_STENCIL
            | GfxCaps::NPOT_TEXTURES
            | GfxCaps::GLSL;
    }
    if at_least(3, 1) || has("GL_ARB_texture_rectangle") {
        caps |= GfxCaps::RECTANGLE_TEXTURES;
    }
    if !version.is_embedded && (at_least(3, 0) || has("GL_ARB_texture_float")) {
        caps |= GfxCaps::FLOAT_TEX_16
            | GfxCaps::FLOAT_TEX_32
            | GfxCaps::FLOAT_BLEND_16
            | GfxCaps::FLOAT_FILTER_16
            | GfxCaps::FLOAT_FILTER_32
            | GfxCaps::UNORM_TEX_16;
        // 32 bpc blending is optional on GL 3.x; drivers advertising this
        // extension all blend at 32 bpc.
        if has("GL_ARB_color_buffer_float") || at_least(4, 0) {
            caps |= GfxCaps::FLOAT_BLEND_32;
        }
    }
    if at_least(3, 1) {
        caps |= GfxCaps::SNORM_TEX_16;
    }
    if at_least(3, 2) {
        caps |= GfxCaps::MULTISAMPLE_TEXTURE | GfxCaps::GEOMETRY_SHADERS;
    }
    if has("GL_EXT_framebuffer_multisample_blit_scaled") {
        caps |= GfxCaps::FBO_SCALED_RESOLVE_BLIT;
    }
    if stereo {
        caps |= GfxCaps::NATIVE_STEREO;
    }
    caps
}

/// Vertex array + buffer for one streamed textured quad.
#[derive(Debug)]
struct QuadBuffers {
    vao: glow::NativeVertexArray,
    vbo: glow::NativeBuffer,
}

impl QuadBuffers {
    unsafe fn new(gl: &glow::Context, capacity_bytes: i32, data: Option<&[u8]>) -> Result<Self, ImagingError> {
        let vao = gl
            .create_vertex_array()
            .map_err(|e| ImagingError::GlCreate(format!("create_vertex_array: {e}")))?;
        let vbo = match gl.create_buffer() {
            Ok(b) => b,
            Err(e) => {
                gl.delete_vertex_array(vao);
                return Err(ImagingError::GlCreate(format!("create_buffer: {e}")));
            }
        };

        gl.bind_vertex_array(Some(vao));
        gl.bind_buffer(glow::ARRAY_BUFFER, Some(vbo));
        match data {
            Some(bytes) => gl.buffer_data_u8_slice(glow::ARRAY_BUFFER, bytes, glow::STATIC_DRAW),
            None => gl.buffer_data_size(glow::ARRAY_BUFFER, capacity_bytes, glow::DYNAMIC_DRAW),
        }

        gl.enable_vertex_attrib_array(0);
        gl.vertex_attrib_pointer_f32(0, 2, glow::FLOAT, false, 4 * 4, 0);

        gl.enable_vertex_attrib_array(1);
        gl.vertex_attrib_pointer_f32(1, 2, glow::FLOAT, false, 4 * 4, 2 * 4);

        gl.bind_buffer(glow::ARRAY_BUFFER, None);
        gl.bind_vertex_array(None);
        Ok(Self { vao, vbo })
    }

    unsafe fn destroy(&self, gl: &glow::Context) {
        gl.delete_vertex_array(self.vao);
        gl.delete_buffer(self.vbo);
    }
}

fn flatten(vertices: &[TexVertex]) -> Vec<f32> {
    vertices
        .iter()
        .flat_map(|v| [v.pos[0], v.pos[1], v.uv[0], v.uv[1]])
        .collect()
}

#[derive(Debug)]
struct GeometryList {
    buffers: QuadBuffers,
    count: i32,
}

/// `GlDevice` over a glow context. Owns the context; the host borrows it
/// through [`GlowDevice::gl`] for its own drawing.
pub struct GlowDevice {
    gl: glow::Context,
    caps: GfxCaps,
    max_samples: u32,
    quad: QuadBuffers,
    rect_program: glow::NativeProgram,
    tex2d_program: glow::NativeProgram,
    solid_program: glow::NativeProgram,
    scratch_fbo: glow::NativeFramebuffer,
    scratch_tex: glow::NativeTexture,
    /// Program selected by the pipeline, 0 = default quad program.
    user_program: u32,
    bound_fb: u32,
    viewport: PixelRect,
    projection: [f32; 16],
    scissor: Option<PixelRect>,
    projection_locs: HashMap<u32, Option<glow::NativeUniformLocation>>,
    lists: HashMap<u32, GeometryList>,
    next_list: u32,
}

impl fmt::Debug for GlowDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GlowDevice")
            .field("caps", &self.caps)
            .field("max_samples", &self.max_samples)
            .field("bound_fb", &self.bound_fb)
            .field("viewport", &self.viewport)
            .field("lists", &self.lists.len())
            .finish_non_exhaustive()
    }
}

impl GlowDevice {
    /// The context must be current on this thread for the lifetime of the device.
    pub unsafe fn new(gl: glow::Context) -> Result<Self, ImagingError> {
        let stereo = gl.get_parameter_i32(glow::STEREO) != 0;
        let caps = caps_from(gl.version(), gl.supported_extensions(), stereo);
        let max_samples = gl.get_parameter_i32(glow::MAX_SAMPLES).max(0) as u32;

        let quad = QuadBuffers::new(&gl, 4 * 4 * 4, None)?;
        let rect_program = default_program(&gl, QUAD_RECT_FRAG)?;
        let tex2d_program = default_program(&gl, QUAD_2D_FRAG)?;
        let solid_program = compile_program(&gl, stimpipe_runtime::shaders::PIPELINE_VERT, SOLID_FRAG, None)?;
        let scratch_fbo = gl
            .create_framebuffer()
            .map_err(|e| ImagingError::GlCreate(format!("create_framebuffer failed: {e:?}")))?;
        let scratch_tex = gl
            .create_texture()
            .map_err(|e| ImagingError::GlCreate(format!("create_texture failed: {e:?}")))?;

        debug!(?caps, max_samples, version = ?gl.version(), "glow device ready");
        Ok(Self {
            gl,
            caps,
            max_samples,
            quad,
            rect_program,
            tex2d_program,
            solid_program,
            scratch_fbo,
            scratch_tex,
            user_program: 0,
            bound_fb: 0,
            viewport: PixelRect::default(),
            projection: ortho(1, 1),
            scissor: None,
            projection_locs: HashMap::new(),
            lists: HashMap::new(),
            next_list: 1,
        })
    }

    pub fn gl(&self) -> &glow::Context {
        &self.gl
    }

    /// Free the backend's own objects. Pipeline objects are freed by the pipeline.
    pub unsafe fn destroy(&mut self) {
        self.quad.destroy(&self.gl);
        for (_, list) in self.lists.drain() {
            list.buffers.destroy(&self.gl);
        }
        self.gl.delete_program(self.rect_program);
        self.gl.delete_program(self.tex2d_program);
        self.gl.delete_program(self.solid_program);
        self.gl.delete_framebuffer(self.scratch_fbo);
        self.gl.delete_texture(self.scratch_tex);
    }

    /// Top-down pixel rect to GL's bottom-up window coordinates.
    fn flip_y(&self, r: PixelRect) -> (i32, i32, i32, i32) {
        (r.x, self.viewport.h - r.y - r.h, r.w, r.h)
    }

    unsafe fn upload_projection(&mut self, prog: glow::NativeProgram, matrix: &[f32; 16]) {
        let id = prog.0.get();
        let gl = &self.gl;
        let loc = self
            .projection_locs
            .entry(id)
            .or_insert_with(|| gl.get_uniform_location(prog, "uProjection"));
        if let Some(loc) = loc.as_ref() {
            gl.uniform_matrix_4_f32_slice(Some(loc), false, matrix);
        }
    }

    fn quad_program(&self, source: TexTarget) -> glow::NativeProgram {
        match (program(self.user_program), source) {
            (Some(p), _) => p,
            (None, TexTarget::Tex2D) => self.tex2d_program,
            (None, _) => self.rect_program,
        }
    }

    unsafe fn draw_strip(&mut self, prog: glow::NativeProgram, vertices: &[TexVertex; 4]) {
        let data = flatten(vertices);
        let projection = self.projection;
        self.gl.use_program(Some(prog));
        self.upload_projection(prog, &projection);
        self.gl.bind_vertex_array(Some(self.quad.vao));
        self.gl.bind_buffer(glow::ARRAY_BUFFER, Some(self.quad.vbo));
        self.gl
            .buffer_sub_data_u8_slice(glow::ARRAY_BUFFER, 0, bytemuck::cast_slice(&data));
        self.gl.draw_arrays(glow::TRIANGLE_STRIP, 0, 4);
        self.gl.bind_buffer(glow::ARRAY_BUFFER, None);
        self.gl.bind_vertex_array(None);
        self.gl.use_program(None);
    }
}

impl GlDevice for GlowDevice {
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
        let t = tex_target(target);
        let (internal, pixel_format, ty) = storage(format);
        unsafe {
            let tex = self
                .gl
                .create_texture()
                .map_err(|e| ImagingError::GlCreate(format!("create_texture failed: {e:?}")))?;
            self.gl.bind_texture(t, Some(tex));
            match target {
                TexTarget::Tex2DMultisample => {
                    self.gl
                        .tex_image_2d_multisample(t, samples as i32, internal as i32, width, height, true);
                }
                TexTarget::Tex2D | TexTarget::Rect => {
                    self.gl.tex_parameter_i32(t, glow::TEXTURE_MIN_FILTER, glow::NEAREST as i32);
                    self.gl.tex_parameter_i32(t, glow::TEXTURE_MAG_FILTER, glow::NEAREST as i32);
                    self.gl.tex_parameter_i32(t, glow::TEXTURE_WRAP_S, glow::CLAMP_TO_EDGE as i32);
                    self.gl.tex_parameter_i32(t, glow::TEXTURE_WRAP_T, glow::CLAMP_TO_EDGE as i32);
                    self.gl
                        .tex_image_2d(t, 0, internal as i32, width, height, 0, pixel_format, ty, None);
                }
                TexTarget::Tex1D | TexTarget::Tex3D => {
                    self.gl.bind_texture(t, None);
                    self.gl.delete_texture(tex);
                    return Err(ImagingError::Unsupported(format!(
                        "{target:?} render targets"
                    )));
                }
            }
            self.gl.bind_texture(t, None);
            Ok(tex.0.get())
        }
    }

    fn create_renderbuffer(
        &mut self,
        format: StorageFormat,
        width: i32,
        height: i32,
        samples: u32,
    ) -> Result<u32, ImagingError> {
        let (internal, _, _) = storage(format);
        unsafe {
            let rb = self
                .gl
                .create_renderbuffer()
                .map_err(|e| ImagingError::GlCreate(format!("create_renderbuffer failed: {e:?}")))?;
            self.gl.bind_renderbuffer(glow::RENDERBUFFER, Some(rb));
            if samples > 0 {
                self.gl.renderbuffer_storage_multisample(
                    glow::RENDERBUFFER,
                    samples as i32,
                    internal,
                    width,
                    height,
                );
            } else {
                self.gl.renderbuffer_storage(glow::RENDERBUFFER, internal, width, height);
            }
            self.gl.bind_renderbuffer(glow::RENDERBUFFER, None);
            Ok(rb.0.get())
        }
    }

    fn create_framebuffer(&mut self) -> Result<u32, ImagingError> {
        unsafe {
            self.gl
                .create_framebuffer()
                .map(|f| f.0.get())
                .map_err(|e| ImagingError::GlCreate(format!("create_framebuffer failed: {e:?}")))
        }
    }

    fn delete_texture(&mut self, name: u32) {
        if let Some(t) = texture(name) {
            unsafe { self.gl.delete_texture(t) };
        }
    }

    fn delete_renderbuffer(&mut self, name: u32) {
        if let Some(rb) = renderbuffer(name) {
            unsafe { self.gl.delete_renderbuffer(rb) };
        }
    }

    fn delete_framebuffer(&mut self, name: u32) {
        if let Some(fb) = framebuffer(name) {
            if self.bound_fb == name {
                self.bind_framebuffer(0);
            }
            unsafe { self.gl.delete_framebuffer(fb) };
        }
    }

    fn bind_framebuffer(&mut self, name: u32) {
        unsafe { self.gl.bind_framebuffer(glow::FRAMEBUFFER, framebuffer(name)) };
        self.bound_fb = name;
    }

    fn bound_framebuffer(&self) -> u32 {
        self.bound_fb
    }

    fn attach_texture(&mut self, attachment: Attachment, target: TexTarget, name: u32) {
        let point = match attachment {
            Attachment::Color0 => glow::COLOR_ATTACHMENT0,
            Attachment::Depth => glow::DEPTH_ATTACHMENT,
            Attachment::Stencil => glow::STENCIL_ATTACHMENT,
            Attachment::DepthStencil => glow::DEPTH_STENCIL_ATTACHMENT,
        };
        unsafe {
            self.gl
                .framebuffer_texture_2d(glow::FRAMEBUFFER, point, tex_target(target), texture(name), 0);
        }
    }

    fn attach_renderbuffer(&mut self, attachment: Attachment, name: u32) {
        let point = match attachment {
            Attachment::Color0 => glow::COLOR_ATTACHMENT0,
            Attachment::Depth => glow::DEPTH_ATTACHMENT,
            Attachment::Stencil => glow::STENCIL_ATTACHMENT,
            Attachment::DepthStencil => glow::DEPTH_STENCIL_ATTACHMENT,
        };
        unsafe {
            self.gl
                .framebuffer_renderbuffer(glow::FRAMEBUFFER, point, glow::RENDERBUFFER, renderbuffer(name));
        }
    }

    fn framebuffer_status(&mut self) -> FboStatus {
        status(unsafe { self.gl.check_framebuffer_status(glow::FRAMEBUFFER) })
    }

    fn set_draw_buffer(&mut self, buffer: DrawBuffer) {
        let b = match buffer {
            DrawBuffer::Back => glow::BACK,
            DrawBuffer::BackLeft => glow::BACK_LEFT,
            DrawBuffer::BackRight => glow::BACK_RIGHT,
        };
        let restore = self.bound_fb;
        unsafe {
            self.gl.bind_framebuffer(glow::FRAMEBUFFER, None);
            self.gl.draw_buffer(b);
            self.gl.bind_framebuffer(glow::FRAMEBUFFER, framebuffer(restore));
        }
    }

    fn blit_framebuffer(&mut self, src: u32, dst: u32, src_rect: PixelRect, dst_rect: PixelRect, filter: Filter) {
        let f = match filter {
            Filter::Nearest => glow::NEAREST,
            Filter::Linear => glow::LINEAR,
        };
        unsafe {
            self.gl.bind_framebuffer(glow::READ_FRAMEBUFFER, framebuffer(src));
            self.gl.bind_framebuffer(glow::DRAW_FRAMEBUFFER, framebuffer(dst));
            self.gl.blit_framebuffer(
                src_rect.x,
                src_rect.y,
                src_rect.x + src_rect.w,
                src_rect.y + src_rect.h,
                dst_rect.x,
                dst_rect.y,
                dst_rect.x + dst_rect.w,
                dst_rect.y + dst_rect.h,
                glow::COLOR_BUFFER_BIT,
                f,
            );
            self.gl.bind_framebuffer(glow::FRAMEBUFFER, framebuffer(self.bound_fb));
        }
    }

    fn bind_texture(&mut self, unit: u32, target: TexTarget, name: u32) {
        unsafe {
            self.gl.active_texture(glow::TEXTURE0 + unit);
            self.gl.bind_texture(tex_target(target), texture(name));
            self.gl.active_texture(glow::TEXTURE0);
        }
    }

    fn set_texture_filter(&mut self, target: TexTarget, name: u32, filter: Filter) {
        let t = tex_target(target);
        let f = match filter {
            Filter::Nearest => glow::NEAREST,
            Filter::Linear => glow::LINEAR,
        } as i32;
        unsafe {
            self.gl.active_texture(glow::TEXTURE0 + SCRATCH_UNIT);
            self.gl.bind_texture(t, texture(name));
            self.gl.tex_parameter_i32(t, glow::TEXTURE_MIN_FILTER, f);
            self.gl.tex_parameter_i32(t, glow::TEXTURE_MAG_FILTER, f);
            self.gl.bind_texture(t, None);
            self.gl.active_texture(glow::TEXTURE0);
        }
    }

    fn compile_program(&mut self, vertex: &str, fragment: &str, geometry: Option<&str>) -> Result<u32, ImagingError> {
        unsafe { compile_program(&self.gl, vertex, fragment, geometry).map(|p| p.0.get()) }
    }

    fn delete_program(&mut self, name: u32) {
        if let Some(p) = program(name) {
            self.projection_locs.remove(&name);
            if self.user_program == name {
                self.user_program = 0;
            }
            unsafe { self.gl.delete_program(p) };
        }
    }

    fn use_program(&mut self, name: u32) {
        self.user_program = name;
    }

    fn set_uniform(&mut self, name: u32, uniform: &str, value: Uniform) -> bool {
        let Some(p) = program(name) else {
            return false;
        };
        unsafe {
            let Some(loc) = self.gl.get_uniform_location(p, uniform) else {
                return false;
            };
            self.gl.use_program(Some(p));
            match value {
                Uniform::Int(v) => self.gl.uniform_1_i32(Some(&loc), v),
                Uniform::Float(v) => self.gl.uniform_1_f32(Some(&loc), v),
                Uniform::Vec2([x, y]) => self.gl.uniform_2_f32(Some(&loc), x, y),
                Uniform::Vec3([x, y, z]) => self.gl.uniform_3_f32(Some(&loc), x, y, z),
                Uniform::Vec4([x, y, z, w]) => self.gl.uniform_4_f32(Some(&loc), x, y, z, w),
            }
            self.gl.use_program(None);
        }
        true
    }

    fn viewport(&mut self, rect: PixelRect) {
        self.viewport = rect;
        unsafe { self.gl.viewport(rect.x, 0, rect.w, rect.h) };
    }

    fn set_projection_ortho(&mut self, width: i32, height: i32) {
        self.projection = ortho(width, height);
    }

    fn set_scissor(&mut self, rect: Option<PixelRect>) {
        self.scissor = rect;
        unsafe {
            match rect {
                Some(r) => {
                    let (x, y, w, h) = self.flip_y(r);
                    self.gl.enable(glow::SCISSOR_TEST);
                    self.gl.scissor(x, y, w, h);
                }
                None => self.gl.disable(glow::SCISSOR_TEST),
            }
        }
    }

    fn scissor(&self) -> Option<PixelRect> {
        self.scissor
    }

    fn set_blend(&mut self, blend: Option<BlendState>) {
        unsafe {
            match blend {
                Some(b) => {
                    self.gl.enable(glow::BLEND);
                    self.gl.blend_func_separate(
                        blend_factor(b.src_rgb),
                        blend_factor(b.dst_rgb),
                        blend_factor(b.src_alpha),
                        blend_factor(b.dst_alpha),
                    );
                }
                None => self.gl.disable(glow::BLEND),
            }
        }
    }

    fn draw_textured_quad(&mut self, vertices: &[TexVertex; 4], source: TexTarget) {
        let prog = self.quad_program(source);
        unsafe { self.draw_strip(prog, vertices) };
    }

    fn draw_solid_rect(&mut self, rect: [f32; 4], color: [f32; 4]) {
        let [x0, y0, x1, y1] = rect;
        let corner = |x: f32, y: f32| TexVertex { pos: [x, y], uv: [0.0, 0.0] };
        let verts = [corner(x0, y0), corner(x0, y1), corner(x1, y0), corner(x1, y1)];
        let prog = self.solid_program;
        self.set_uniform(prog.0.get(), "uColor", Uniform::Vec4(color));
        unsafe { self.draw_strip(prog, &verts) };
    }

    fn write_pixel_row(&mut self, x: i32, y: i32, rgb: &[u8]) {
        let n = (rgb.len() / 3) as i32;
        if n == 0 {
            return;
        }
        let row = self.viewport.h - 1 - y;
        unsafe {
            self.gl.active_texture(glow::TEXTURE0 + SCRATCH_UNIT);
            self.gl.bind_texture(glow::TEXTURE_2D, Some(self.scratch_tex));
            self.gl.pixel_store_i32(glow::UNPACK_ALIGNMENT, 1);
            self.gl.tex_image_2d(
                glow::TEXTURE_2D,
                0,
                glow::RGB8 as i32,
                n,
                1,
                0,
                glow::RGB,
                glow::UNSIGNED_BYTE,
                Some(&rgb[..(n as usize) * 3]),
            );
            self.gl.pixel_store_i32(glow::UNPACK_ALIGNMENT, 4);
            self.gl.bind_texture(glow::TEXTURE_2D, None);
            self.gl.active_texture(glow::TEXTURE0);

            self.gl.bind_framebuffer(glow::READ_FRAMEBUFFER, Some(self.scratch_fbo));
            self.gl.framebuffer_texture_2d(
                glow::READ_FRAMEBUFFER,
                glow::COLOR_ATTACHMENT0,
                glow::TEXTURE_2D,
                Some(self.scratch_tex),
                0,
            );
            self.gl.bind_framebuffer(glow::DRAW_FRAMEBUFFER, framebuffer(self.bound_fb));
            self.gl.blit_framebuffer(0, 0, n, 1, x, row, x + n, row + 1, glow::COLOR_BUFFER_BIT, glow::NEAREST);
            self.gl.bind_framebuffer(glow::FRAMEBUFFER, framebuffer(self.bound_fb));
        }
    }

    fn create_geometry_list(&mut self, vertices: &[TexVertex]) -> Result<u32, ImagingError> {
        let data = flatten(vertices);
        let bytes: &[u8] = bytemuck::cast_slice(&data);
        let buffers = unsafe { QuadBuffers::new(&self.gl, bytes.len() as i32, Some(bytes))? };
        let id = self.next_list;
        self.next_list += 1;
        self.lists.insert(
            id,
            GeometryList {
                buffers,
                count: vertices.len() as i32,
            },
        );
        Ok(id)
    }

    fn draw_geometry_list(&mut self, list: u32, transform: &Affine2) -> Result<(), ImagingError> {
        let Some(l) = self.lists.get(&list) else {
            return Err(ImagingError::Precondition(format!("no geometry list {list}")));
        };
        let (vao, count) = (l.buffers.vao, l.count);
        let prog = self.quad_program(TexTarget::Rect);
        let matrix = with_affine(&self.projection, transform);
        unsafe {
            self.gl.use_program(Some(prog));
            self.upload_projection(prog, &matrix);
            self.gl.bind_vertex_array(Some(vao));
            self.gl.draw_arrays(glow::TRIANGLES, 0, count);
            self.gl.bind_vertex_array(None);
            self.gl.use_program(None);
        }
        Ok(())
    }

    fn delete_geometry_list(&mut self, list: u32) {
        if let Some(l) = self.lists.remove(&list) {
            unsafe { l.buffers.destroy(&self.gl) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ortho_maps_corners_y_down() {
        let m = ortho(200, 100);
        let apply = |x: f32, y: f32| [m[0] * x + m[12], m[5] * y + m[13]];
        let close = |a: [f32; 2], b: [f32; 2]| (a[0] - b[0]).abs() < 1e-5 && (a[1] - b[1]).abs() < 1e-5;
        assert!(close(apply(0.0, 0.0), [-1.0, 1.0]));
        assert!(close(apply(200.0, 100.0), [1.0, -1.0]));
    }

    #[test]
    fn affine_folds_into_projection() {
        let p = ortho(100, 100);
        let shift = Affine2([1.0, 0.0, 50.0, 0.0, 1.0, 50.0]);
        let m = with_affine(&p, &shift);
        // Origin lands in the viewport center.
        assert!((m[12]).abs() < 1e-6);
        assert!((m[13]).abs() < 1e-6);
    }

    #[test]
    fn status_codes_map_to_reasons() {
        assert_eq!(status(glow::FRAMEBUFFER_COMPLETE), FboStatus::Complete);
        assert_eq!(status(glow::FRAMEBUFFER_INCOMPLETE_MULTISAMPLE), FboStatus::IncompleteMultisample);
        assert_eq!(status(0x1234), FboStatus::Unknown(0x1234));
    }
}
