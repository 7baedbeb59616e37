//! Backend-internal shader programs and the compile/link helper.

use glow::HasContext;
use stimpipe_core::ImagingError;
use stimpipe_runtime::shaders::PIPELINE_VERT;

/// Default textured-quad program for rectangle textures.
pub const QUAD_RECT_FRAG: &str = r#"#version 330 core
in vec2 v_uv;
out vec4 o;
uniform sampler2DRect Image;
void main() { o = texture(Image, v_uv); }
"#;

/// Default textured-quad program for normalized 2D textures.
pub const QUAD_2D_FRAG: &str = r#"#version 330 core
in vec2 v_uv;
out vec4 o;
uniform sampler2D Image;
void main() { o = texture(Image, v_uv); }
"#;

pub const SOLID_FRAG: &str = r#"#version 330 core
in vec2 v_uv;
out vec4 o;
uniform vec4 uColor;
void main() { o = uColor; }
"#;

unsafe fn compile_stage(gl: &glow::Context, kind: u32, src: &str) -> Result<glow::NativeShader, ImagingError> {
    let shader = gl
        .create_shader(kind)
        .map_err(|e| ImagingError::GlCreate(format!("create_shader(0x{kind:x}) failed: {e:?}")))?;
    gl.shader_source(shader, src);
    gl.compile_shader(shader);
    if gl.get_shader_compile_status(shader) {
        return Ok(shader);
    }
    let log = gl.get_shader_info_log(shader);
    gl.delete_shader(shader);
    Err(match kind {
        glow::VERTEX_SHADER => ImagingError::VertexCompile(log),
        glow::GEOMETRY_SHADER => ImagingError::GeometryCompile(log),
        _ => ImagingError::FragmentCompile(log),
    })
}

pub unsafe fn compile_program(
    gl: &glow::Context,
    vert_src: &str,
    frag_src: &str,
    geom_src: Option<&str>,
) -> Result<glow::NativeProgram, ImagingError> {
    let mut stages = Vec::with_capacity(3);
    let sources = [
        (glow::VERTEX_SHADER, Some(vert_src)),
        (glow::GEOMETRY_SHADER, geom_src),
        (glow::FRAGMENT_SHADER, Some(frag_src)),
    ];
    for (kind, src) in sources {
        let Some(src) = src else { continue };
        match compile_stage(gl, kind, src) {
            Ok(s) => stages.push(s),
            Err(e) => {
                for s in stages {
                    gl.delete_shader(s);
                }
                return Err(e);
            }
        }
    }

    let program = match gl.create_program() {
        Ok(p) => p,
        Err(e) => {
            for s in stages {
                gl.delete_shader(s);
            }
            return Err(ImagingError::GlCreate(format!("create_program failed: {e:?}")));
        }
    };
    for s in &stages {
        gl.attach_shader(program, *s);
    }
    gl.link_program(program);
    for s in stages {
        gl.detach_shader(program, s);
        gl.delete_shader(s);
    }

    if !gl.get_program_link_status(program) {
        let log = gl.get_program_info_log(program);
        gl.delete_program(program);
        return Err(ImagingError::Link(log));
    }
    Ok(program)
}

/// Compile a default program and point its `Image` sampler at unit 0.
pub unsafe fn default_program(gl: &glow::Context, frag_src: &str) -> Result<glow::NativeProgram, ImagingError> {
    let program = compile_program(gl, PIPELINE_VERT, frag_src, None)?;
    gl.use_program(Some(program));
    if let Some(loc) = gl.get_uniform_location(program, "Image") {
        gl.uniform_1_i32(Some(&loc), 0);
    }
    gl.use_program(None);
    Ok(program)
}
