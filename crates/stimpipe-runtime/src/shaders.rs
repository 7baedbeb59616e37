//! Shader program builder and the built-in shader catalogue.
//!
//! Every pipeline buffer is a rectangle texture, so catalogue shaders sample
//! in pixel coordinates. User programs for shader entries must declare the
//! `uProjection` uniform of [`PIPELINE_VERT`].

use std::collections::HashMap;

use stimpipe_core::{GfxCaps, ImagingError};
use tracing::error;

use crate::device::{GlDevice, Uniform};

pub const PIPELINE_VERT: &str = r#"#version 330 core
layout (location = 0) in vec2 a_pos;
layout (location = 1) in vec2 a_uv;
uniform mat4 uProjection;
out vec2 v_uv;
void main() {
    v_uv = a_uv;
    gl_Position = uProjection * vec4(a_pos, 0.0, 1.0);
}
"#;

pub const PASSTHROUGH_FRAG: &str = r#"#version 330 core
in vec2 v_uv;
out vec4 o;
uniform sampler2DRect Image;
void main() { o = texture(Image, v_uv); }
"#;

pub const MODULATE_FRAG: &str = r#"#version 330 core
in vec2 v_uv;
out vec4 o;
uniform sampler2DRect Image;
uniform vec4 modulateColor;
void main() {
    vec4 t = texture(Image, v_uv);
#ifdef OPAQUE
    t.a = 1.0;
#endif
    o = t * modulateColor;
}
"#;

/// Linear filtering done by hand for formats the sampler cannot filter.
pub const BILINEAR_FRAG: &str = r#"#version 330 core
in vec2 v_uv;
out vec4 o;
uniform sampler2DRect Image;
void main() {
    vec2 p = v_uv - 0.5;
    vec2 f = fract(p);
    vec2 b = floor(p) + 0.5;
    vec4 t00 = texture(Image, b);
    vec4 t10 = texture(Image, b + vec2(1.0, 0.0));
    vec4 t01 = texture(Image, b + vec2(0.0, 1.0));
    vec4 t11 = texture(Image, b + vec2(1.0, 1.0));
    o = mix(mix(t00, t10, f.x), mix(t01, t11, f.x), f.y);
}
"#;

/// Planes of `CHANNELS` single-channel images stacked vertically.
pub const PLANAR_FRAG: &str = r#"in vec2 v_uv;
out vec4 o;
uniform sampler2DRect Image;
uniform float planeHeight;
float plane(int i) { return texture(Image, v_uv + vec2(0.0, float(i) * planeHeight)).r; }
void main() {
#if CHANNELS == 1
    o = vec4(vec3(plane(0)), 1.0);
#elif CHANNELS == 2
    o = vec4(vec3(plane(0)), plane(1));
#elif CHANNELS == 3
    o = vec4(plane(0), plane(1), plane(2), 1.0);
#else
    o = vec4(plane(0), plane(1), plane(2), plane(3));
#endif
}
"#;

/// I420: full-size Y plane, then half-size U and V side by side below it.
pub const YUV420_FRAG: &str = r#"#version 330 core
in vec2 v_uv;
out vec4 o;
uniform sampler2DRect Image;
uniform float planeHeight;
uniform float planeWidth;
void main() {
    vec2 c = floor(v_uv) * 0.5 + 0.5;
    float y = texture(Image, v_uv).r;
    float u = texture(Image, vec2(c.x, planeHeight + c.y)).r;
    float v = texture(Image, vec2(planeWidth * 0.5 + c.x, planeHeight + c.y)).r;
    y = 1.1643 * (y - 0.0625);
    u -= 0.5;
    v -= 0.5;
    o = vec4(y + 1.5958 * v, y - 0.39173 * u - 0.81290 * v, y + 2.017 * u, 1.0);
}
"#;

/// Luma packed four pixels per RGBA8 texel.
pub const PACKED_LUMA8_FRAG: &str = r#"#version 330 core
in vec2 v_uv;
out vec4 o;
uniform sampler2DRect Image;
void main() {
    vec4 t = texture(Image, vec2(floor(v_uv.x / 4.0) + 0.5, v_uv.y));
    int i = int(mod(floor(v_uv.x), 4.0));
    o = vec4(vec3(t[i]), 1.0);
}
"#;

pub const MULTISAMPLE_RESOLVE_FRAG: &str = r#"#version 330 core
in vec2 v_uv;
out vec4 o;
uniform sampler2DMS Image;
uniform int nrsamples;
void main() {
    vec4 acc = vec4(0.0);
    for (int i = 0; i < nrsamples; i++) {
        acc += texelFetch(Image, ivec2(v_uv), i);
    }
    o = acc / float(max(nrsamples, 1));
}
"#;

pub const ANAGLYPH_FRAG: &str = r#"#version 330 core
in vec2 v_uv;
out vec4 o;
uniform sampler2DRect Image1;
uniform sampler2DRect Image2;
uniform vec3 Gains1;
uniform vec3 Gains2;
uniform vec3 ColorToGrayWeights;
void main() {
    float l = dot(texture(Image1, v_uv).rgb, ColorToGrayWeights);
    float r = dot(texture(Image2, v_uv).rgb, ColorToGrayWeights);
    o = vec4(Gains1 * l + Gains2 * r, 1.0);
}
"#;

/// Built-in program purposes. Cached per (purpose, channel count).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderPurpose {
    Passthrough,
    Modulate,
    BilinearFilter,
    Planar,
    Yuv420,
    PackedLuma8,
    MultisampleResolve,
    Anaglyph,
    /// Pass-through reading the left view (unit 0).
    StereoLeftView,
    /// Pass-through reading the right view (unit 1).
    StereoRightView,
}

/// Fragment source and sampler unit assignments of a catalogue entry.
pub fn catalogue(purpose: ShaderPurpose, channels: u8) -> Result<(String, &'static [(&'static str, i32)]), ImagingError> {
    const IMAGE0: &[(&str, i32)] = &[("Image", 0)];
    const IMAGE1: &[(&str, i32)] = &[("Image", 1)];
    const STEREO: &[(&str, i32)] = &[("Image1", 0), ("Image2", 1)];
    Ok(match purpose {
        ShaderPurpose::Passthrough | ShaderPurpose::StereoLeftView => (PASSTHROUGH_FRAG.to_string(), IMAGE0),
        ShaderPurpose::StereoRightView => (PASSTHROUGH_FRAG.to_string(), IMAGE1),
        ShaderPurpose::Modulate => {
            let src = if channels == 4 {
                MODULATE_FRAG.to_string()
            } else {
                MODULATE_FRAG.replacen("#version 330 core\n", "#version 330 core\n#define OPAQUE\n", 1)
            };
            (src, IMAGE0)
        }
        ShaderPurpose::BilinearFilter => (BILINEAR_FRAG.to_string(), IMAGE0),
        ShaderPurpose::Planar => {
            if !(1..=4).contains(&channels) {
                return Err(ImagingError::Precondition(format!(
                    "planar sampler needs 1 to 4 channels, got {channels}"
                )));
            }
            (
                format!("#version 330 core\n#define CHANNELS {channels}\n{PLANAR_FRAG}"),
                IMAGE0,
            )
        }
        ShaderPurpose::Yuv420 => (YUV420_FRAG.to_string(), IMAGE0),
        ShaderPurpose::PackedLuma8 => (PACKED_LUMA8_FRAG.to_string(), IMAGE0),
        ShaderPurpose::MultisampleResolve => (MULTISAMPLE_RESOLVE_FRAG.to_string(), IMAGE0),
        ShaderPurpose::Anaglyph => (ANAGLYPH_FRAG.to_string(), STEREO),
    })
}

/// Compile and link a program. `vertex` defaults to [`PIPELINE_VERT`].
///
/// Diagnostics go to the log; on failure no program object is left behind.
pub fn build_program<D: GlDevice>(
    dev: &mut D,
    fragment: &str,
    vertex: Option<&str>,
    geometry: Option<&str>,
) -> Result<u32, ImagingError> {
    if geometry.is_some() && !dev.caps().contains(GfxCaps::GEOMETRY_SHADERS) {
        return Err(ImagingError::Unsupported("geometry shaders".to_string()));
    }
    dev.compile_program(vertex.unwrap_or(PIPELINE_VERT), fragment, geometry)
        .map_err(|e| {
            error!(%e, "shader program build failed");
            e
        })
}

/// Built programs of one window, keyed by (purpose, channel count).
#[derive(Debug, Default)]
pub struct ShaderCache {
    programs: HashMap<(ShaderPurpose, u8), u32>,
}

impl ShaderCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, purpose: ShaderPurpose, channels: u8) -> Option<u32> {
        self.programs.get(&(purpose, channels)).copied()
    }

    pub fn get_or_build<D: GlDevice>(
        &mut self,
        dev: &mut D,
        purpose: ShaderPurpose,
        channels: u8,
    ) -> Result<u32, ImagingError> {
        if let Some(p) = self.get(purpose, channels) {
            return Ok(p);
        }
        let (frag, samplers) = catalogue(purpose, channels)?;
        let program = build_program(dev, &frag, None, None)?;
        for (name, unit) in samplers {
            dev.set_uniform(program, name, Uniform::Int(*unit));
        }
        self.programs.insert((purpose, channels), program);
        Ok(program)
    }

    pub fn len(&self) -> usize {
        self.programs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }

    pub fn clear<D: GlDevice>(&mut self, dev: &mut D) {
        for (_, p) in self.programs.drain() {
            dev.delete_program(p);
        }
    }
}
