//! The blit configuration mini-language, parsed once when an entry is created.
//!
//! A configuration string is a loose collection of independent modifiers:
//!
//! * `Blitter:IdentityBlit` (default) or `Blitter:DisplayListBlit:Handle:<n>`
//! * `Offset:<x>:<y>`, `Scaling:<sx>:<sy>`, `Rotation:<deg>`, `RotCenter:<cx>:<cy>`
//! * `OvrSize:<w>:<h>` emits a quad of that size instead of the source size
//! * `Bilinear` samples the source with linear filtering for this blit only
//! * `TEXTURE1D(<unit>)=<id>`, `TEXTURE2D(..)`, `TEXTURERECT2D(..)`, `TEXTURE3D(..)`
//!   bind auxiliary textures for the duration of the blit
//!
//! Unknown text is ignored; a known keyword with malformed values is an error.

use stimpipe_core::ImagingError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureTarget {
    Tex1D,
    Tex2D,
    Rect,
    Tex3D,
}

impl TextureTarget {
    fn keyword(self) -> &'static str {
        match self {
            TextureTarget::Tex1D => "TEXTURE1D(",
            TextureTarget::Tex2D => "TEXTURE2D(",
            TextureTarget::Rect => "TEXTURERECT2D(",
            TextureTarget::Tex3D => "TEXTURE3D(",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureBinding {
    pub target: TextureTarget,
    pub unit: u32,
    pub texture: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BlitterChoice {
    #[default]
    Identity,
    /// Replay a retained geometry list instead of emitting a quad.
    DisplayList { handle: u32 },
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct BlitOptions {
    pub blitter: BlitterChoice,
    pub offset: Option<[f32; 2]>,
    pub scaling: Option<[f32; 2]>,
    /// Degrees, counter-clockwise.
    pub rotation: Option<f32>,
    pub rot_center: Option<[f32; 2]>,
    pub ovr_size: Option<[f32; 2]>,
    pub bilinear: bool,
    pub textures: Vec<TextureBinding>,
}

impl BlitOptions {
    pub fn parse(config: &str) -> Result<Self, ImagingError> {
        let mut opts = BlitOptions {
            blitter: parse_blitter(config)?,
            ..BlitOptions::default()
        };

        opts.offset = pair(config, "Offset:")?;
        opts.scaling = pair(config, "Scaling:")?;
        opts.rotation = values(config, "Rotation:", 1)?.map(|v| v[0]);
        opts.rot_center = pair(config, "RotCenter:")?;
        opts.ovr_size = pair(config, "OvrSize:")?;
        opts.bilinear = config.contains("Bilinear");

        for target in [
            TextureTarget::Tex1D,
            TextureTarget::Tex2D,
            TextureTarget::Rect,
            TextureTarget::Tex3D,
        ] {
            for (at, kw) in config.match_indices(target.keyword()) {
                opts.textures
                    .push(parse_binding(config, &config[at + kw.len()..], target)?);
            }
        }
        opts.textures.sort_by_key(|b| b.unit);

        Ok(opts)
    }

    /// True if the emitted geometry differs from a plain source-sized quad.
    pub fn transforms_geometry(&self) -> bool {
        self.offset.is_some()
            || self.scaling.is_some()
            || self.rotation.is_some()
            || self.ovr_size.is_some()
    }
}

fn parse_blitter(config: &str) -> Result<BlitterChoice, ImagingError> {
    let Some(at) = config.find("Blitter:") else {
        return Ok(BlitterChoice::Identity);
    };
    let rest = &config[at + "Blitter:".len()..];
    let name: String = rest
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric())
        .collect();
    match name.as_str() {
        "IdentityBlit" => Ok(BlitterChoice::Identity),
        "DisplayListBlit" => {
            let handle = values(config, "Handle:", 1)?.ok_or_else(|| bad(config, "DisplayListBlit needs Handle:<n>"))?[0];
            if handle < 1.0 || handle.fract() != 0.0 {
                return Err(bad(config, "geometry list handle must be a positive integer"));
            }
            Ok(BlitterChoice::DisplayList {
                handle: handle as u32,
            })
        }
        other => Err(bad(config, &format!("unknown blitter '{other}'"))),
    }
}

fn parse_binding(config: &str, rest: &str, target: TextureTarget) -> Result<TextureBinding, ImagingError> {
    let close = rest
        .find(')')
        .ok_or_else(|| bad(config, "texture binding is missing ')'"))?;
    let unit = rest[..close]
        .trim()
        .parse::<u32>()
        .map_err(|_| bad(config, "texture unit must be a non-negative integer"))?;
    let after = rest[close + 1..]
        .strip_prefix('=')
        .ok_or_else(|| bad(config, "texture binding is missing '=<id>'"))?;
    let texture = leading_number(after)
        .and_then(|s| s.parse::<u32>().ok())
        .ok_or_else(|| bad(config, "texture id must be a non-negative integer"))?;
    Ok(TextureBinding {
        target,
        unit,
        texture,
    })
}

fn pair(config: &str, key: &str) -> Result<Option<[f32; 2]>, ImagingError> {
    Ok(values(config, key, 2)?.map(|v| [v[0], v[1]]))
}

/// `n` colon-separated numbers following the first occurrence of `key`.
fn values(config: &str, key: &str, n: usize) -> Result<Option<Vec<f32>>, ImagingError> {
    let Some(at) = config.find(key) else {
        return Ok(None);
    };
    let out = config[at + key.len()..]
        .split(':')
        .take(n)
        .map(|tok| leading_number(tok).and_then(|s| s.parse::<f32>().ok()))
        .collect::<Option<Vec<f32>>>()
        .filter(|v| v.len() == n)
        .ok_or_else(|| {
            bad(
                config,
                &format!("'{}' expects {n} numeric value(s)", key.trim_end_matches(':')),
            )
        })?;
    Ok(Some(out))
}

fn leading_number(tok: &str) -> Option<&str> {
    let tok = tok.trim_start();
    let end = tok
        .char_indices()
        .find(|&(i, c)| !(c.is_ascii_digit() || c == '.' || ((c == '-' || c == '+') && i == 0)))
        .map(|(i, _)| i)
        .unwrap_or(tok.len());
    (end > 0).then(|| &tok[..end])
}

fn bad(config: &str, msg: &str) -> ImagingError {
    ImagingError::BlitConfig {
        config: config.to_string(),
        msg: msg.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_is_a_plain_identity_blit() {
        let o = BlitOptions::parse("").unwrap();
        assert_eq!(o, BlitOptions::default());
        assert!(!o.transforms_geometry());
    }

    #[test]
    fn modifiers_combine_independently() {
        let o = BlitOptions::parse("Offset:10:-4.5 Scaling:1:0.5 Rotation:90 Bilinear").unwrap();
        assert_eq!(o.offset, Some([10.0, -4.5]));
        assert_eq!(o.scaling, Some([1.0, 0.5]));
        assert_eq!(o.rotation, Some(90.0));
        assert_eq!(o.rot_center, None);
        assert!(o.bilinear);
        assert!(o.transforms_geometry());
    }

    #[test]
    fn colon_joined_modifiers_parse() {
        let o = BlitOptions::parse("Blitter:DisplayListBlit:Handle:7:OvrSize:640:480:RotCenter:1:2").unwrap();
        assert_eq!(o.blitter, BlitterChoice::DisplayList { handle: 7 });
        assert_eq!(o.ovr_size, Some([640.0, 480.0]));
        assert_eq!(o.rot_center, Some([1.0, 2.0]));
    }

    #[test]
    fn texture_bindings_are_collected_by_unit() {
        let o = BlitOptions::parse("TEXTURERECT2D(3)=12 TEXTURE1D(2)=5").unwrap();
        assert_eq!(
            o.textures,
            vec![
                TextureBinding {
                    target: TextureTarget::Tex1D,
                    unit: 2,
                    texture: 5
                },
                TextureBinding {
                    target: TextureTarget::Rect,
                    unit: 3,
                    texture: 12
                },
            ]
        );
    }

    #[test]
    fn malformed_values_are_rejected() {
        assert!(matches!(
            BlitOptions::parse("Offset:10"),
            Err(ImagingError::BlitConfig { .. })
        ));
        assert!(BlitOptions::parse("Scaling:a:b").is_err());
        assert!(BlitOptions::parse("TEXTURE2D(x)=1").is_err());
        assert!(BlitOptions::parse("Blitter:DisplayListBlit").is_err());
        assert!(BlitOptions::parse("Blitter:Warp").is_err());
    }
}
