//! The only seam between the pipeline and OpenGL.
//!
//! Object names are plain `u32`; `0` means "none", and framebuffer `0` is the
//! system framebuffer. Every method assumes the caller's context is current.

use stimpipe_core::{FboStatus, GfxCaps, ImagingError, PixelRect};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColorFormat {
    Rgba8,
    Rgba16,
    Rgba16Snorm,
    Rgba16F,
    Rgba32F,
}

impl ColorFormat {
    pub fn bits_per_channel(self) -> u32 {
        match self {
            ColorFormat::Rgba8 => 8,
            ColorFormat::Rgba16 | ColorFormat::Rgba16Snorm | ColorFormat::Rgba16F => 16,
            ColorFormat::Rgba32F => 32,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, ColorFormat::Rgba16F | ColorFormat::Rgba32F)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DepthFormat {
    /// Packed depth + stencil in one attachment.
    Depth24Stencil8,
    Depth24,
    Depth16,
    Stencil8,
}

/// Storage format of a texture or renderbuffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageFormat {
    Color(ColorFormat),
    Depth(DepthFormat),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TexTarget {
    Tex1D,
    Tex2D,
    /// Rectangle texture, sampled in pixel coordinates.
    Rect,
    Tex3D,
    Tex2DMultisample,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Attachment {
    Color0,
    Depth,
    Stencil,
    DepthStencil,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Filter {
    Nearest,
    Linear,
}

/// Color buffer of the system framebuffer that draws go to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DrawBuffer {
    Back,
    BackLeft,
    BackRight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendFactor {
    Zero,
    One,
    SrcAlpha,
    OneMinusSrcAlpha,
    DstAlpha,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlendState {
    pub src_rgb: BlendFactor,
    pub dst_rgb: BlendFactor,
    pub src_alpha: BlendFactor,
    pub dst_alpha: BlendFactor,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Uniform {
    Int(i32),
    Float(f32),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
}

/// Vertex of a textured quad: position in destination pixels (origin top-left),
/// texture coordinate in the source's own sampling space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TexVertex {
    pub pos: [f32; 2],
    pub uv: [f32; 2],
}

/// Row-major 2x3 affine transform applied to geometry list positions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Affine2(pub [f32; 6]);

impl Affine2 {
    pub const IDENTITY: Affine2 = Affine2([1.0, 0.0, 0.0, 0.0, 1.0, 0.0]);

    pub fn apply(&self, p: [f32; 2]) -> [f32; 2] {
        let m = &self.0;
        [
            m[0] * p[0] + m[1] * p[1] + m[2],
            m[3] * p[0] + m[4] * p[1] + m[5],
        ]
    }

    /// `self` after `other`.
    pub fn then(&self, other: &Affine2) -> Affine2 {
        let a = &other.0;
        let b = &self.0;
        Affine2([
            b[0] * a[0] + b[1] * a[3],
            b[0] * a[1] + b[1] * a[4],
            b[0] * a[2] + b[1] * a[5] + b[2],
            b[3] * a[0] + b[4] * a[3],
            b[3] * a[1] + b[4] * a[4],
            b[3] * a[2] + b[4] * a[5] + b[5],
        ])
    }
}

/// Everything the pipeline asks of an OpenGL implementation.
pub trait GlDevice {
    fn caps(&self) -> GfxCaps;
    fn max_samples(&self) -> u32;

    // ---- Object lifetime ----
    fn create_texture(
        &mut self,
        target: TexTarget,
        format: StorageFormat,
        width: i32,
        height: i32,
        samples: u32,
    ) -> Result<u32, ImagingError>;
    fn create_renderbuffer(
        &mut self,
        format: StorageFormat,
        width: i32,
        height: i32,
        samples: u32,
    ) -> Result<u32, ImagingError>;
    fn create_framebuffer(&mut self) -> Result<u32, ImagingError>;
    fn delete_texture(&mut self, texture: u32);
    fn delete_renderbuffer(&mut self, renderbuffer: u32);
    fn delete_framebuffer(&mut self, framebuffer: u32);

    // ---- Framebuffers ----
    fn bind_framebuffer(&mut self, framebuffer: u32);
    fn bound_framebuffer(&self) -> u32;
    fn attach_texture(&mut self, attachment: Attachment, target: TexTarget, texture: u32);
    fn attach_renderbuffer(&mut self, attachment: Attachment, renderbuffer: u32);
    /// Completeness of the bound framebuffer.
    fn framebuffer_status(&mut self) -> FboStatus;
    fn set_draw_buffer(&mut self, buffer: DrawBuffer);
    /// Copy a color rectangle between framebuffers; rescales if the rects differ.
    fn blit_framebuffer(
        &mut self,
        src: u32,
        dst: u32,
        src_rect: PixelRect,
        dst_rect: PixelRect,
        filter: Filter,
    );

    // ---- Textures ----
    /// Bind `texture` (0 = unbind) on `unit`.
    fn bind_texture(&mut self, unit: u32, target: TexTarget, texture: u32);
    fn set_texture_filter(&mut self, target: TexTarget, texture: u32, filter: Filter);

    // ---- Programs ----
    fn compile_program(
        &mut self,
        vertex: &str,
        fragment: &str,
        geometry: Option<&str>,
    ) -> Result<u32, ImagingError>;
    fn delete_program(&mut self, program: u32);
    /// 0 returns to the backend's built-in textured-quad program.
    fn use_program(&mut self, program: u32);
    /// Set a uniform on `program`. Returns false if the program has no such uniform.
    fn set_uniform(&mut self, program: u32, name: &str, value: Uniform) -> bool;

    // ---- Raster state ----
    fn viewport(&mut self, rect: PixelRect);
    /// Orthographic projection mapping (0,0)..(w,h) onto the viewport, y down.
    fn set_projection_ortho(&mut self, width: i32, height: i32);
    fn set_scissor(&mut self, rect: Option<PixelRect>);
    fn scissor(&self) -> Option<PixelRect>;
    fn set_blend(&mut self, blend: Option<BlendState>);

    // ---- Drawing ----
    /// Draw a textured quad (vertices in strip order) sampling unit 0.
    fn draw_textured_quad(&mut self, vertices: &[TexVertex; 4], source: TexTarget);
    fn draw_solid_rect(&mut self, rect: [f32; 4], color: [f32; 4]);
    /// Overwrite pixels of row `y` (top-down) from column `x` with packed RGB8.
    fn write_pixel_row(&mut self, x: i32, y: i32, rgb: &[u8]);

    // ---- Retained geometry ----
    fn create_geometry_list(&mut self, vertices: &[TexVertex]) -> Result<u32, ImagingError>;
    fn draw_geometry_list(&mut self, list: u32, transform: &Affine2) -> Result<(), ImagingError>;
    fn delete_geometry_list(&mut self, list: u32);
}
