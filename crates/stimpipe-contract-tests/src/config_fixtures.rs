use std::fs;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use stimpipe_core::{load_pipeline_config_from, ImagingError, ImagingMode, PixelRect, StereoMode, WindowInfo};
use stimpipe_hooks::{HookKind, HookPoint};
use stimpipe_runtime::{Filter, Uniform};

use crate::support::window;
use crate::Call;

// ---- Golden fixtures (JSON configuration) ----
const ANAGLYPH_JSON: &str = include_str!("../fixtures/pipeline_anaglyph.json");
const PANEL_FITTER_JSON: &str = include_str!("../fixtures/pipeline_panel_fitter.json");
const BAD_VERBOSITY_JSON: &str = include_str!("../fixtures/pipeline_bad_verbosity.json");
const UNKNOWN_STEREO_JSON: &str = include_str!("../fixtures/pipeline_unknown_stereo.json");

fn write_temp_fixture(name: &str, contents: &str) -> PathBuf {
    let mut p = std::env::temp_dir();
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    p.push(format!("stimpipe_contract_tests_{name}_{ts}.json"));
    fs::write(&p, contents).expect("write fixture");
    p
}

#[test]
fn golden_anaglyph_config_overrides_the_gains() {
    let path = write_temp_fixture("anaglyph", ANAGLYPH_JSON);
    let cfg = load_pipeline_config_from(&path).expect("pipeline_anaglyph.json should parse");
    let _ = fs::remove_file(path);

    assert!(cfg.imaging_mode.contains(ImagingMode::NEED_IMAGE_PROCESSING | ImagingMode::NEED_MULTI_PASS));
    assert_eq!(cfg.multisample, 4);
    assert_eq!(cfg.bounce_share_excluded, vec![StereoMode::FreeFusion]);

    let w = window(WindowInfo::new(800, 600).with_stereo(StereoMode::AnaglyphRedBlue), cfg);
    let entry = &w.hooks().entries(HookPoint::StereoCompositingBlit)[0];
    let HookKind::Shader { program, .. } = entry.kind else {
        panic!("expected the anaglyph shader, got {:?}", entry.kind);
    };
    assert_eq!(w.device().uniform(program, "Gains1"), Some(&Uniform::Vec3([0.9, 0.0, 0.0])));
    assert_eq!(w.device().uniform(program, "Gains2"), Some(&Uniform::Vec3([0.0, 0.7, 0.3])));
    assert_eq!(w.layout().unwrap().samples, 4);
    // Merge with multi-pass reserves both output bounce buffers.
    assert!(w.fbos().pre_conversion[2].is_some());
    assert!(w.fbos().pre_conversion[3].is_some());
}

#[test]
fn golden_panel_fitter_config_rescales_into_the_input_buffer() {
    let path = write_temp_fixture("panel_fitter", PANEL_FITTER_JSON);
    let cfg = load_pipeline_config_from(&path).expect("pipeline_panel_fitter.json should parse");
    let _ = fs::remove_file(path);

    let mut w = window(WindowInfo::new(1920, 1080), cfg);
    let layout = w.layout().unwrap().clone();
    assert_eq!(layout.panel_fitter, Some(PixelRect::sized(1280, 720)));
    assert_eq!(layout.draw_size, (1280, 720));
    assert_eq!(layout.view_size, (1920, 1080));

    let t = w.fbos();
    let draw = t.get(t.draw[0].unwrap()).unwrap().clone();
    let input = t.get(t.input[0].unwrap()).unwrap().clone();
    assert_eq!((draw.width, draw.height), (1280, 720));
    assert_eq!((input.width, input.height), (1920, 1080));

    w.device_mut().clear_calls();
    w.process_frame().expect("frame");
    assert!(w.device().calls.contains(&Call::BlitFramebuffer {
        src: draw.framebuffer,
        dst: input.framebuffer,
        filter: Filter::Linear,
    }));
}

#[test]
fn golden_bad_verbosity_is_rejected() {
    let path = write_temp_fixture("bad_verbosity", BAD_VERBOSITY_JSON);
    let err = load_pipeline_config_from(&path).expect_err("verbosity 42 must fail");
    let _ = fs::remove_file(path);

    assert!(matches!(err, ImagingError::InvalidConfig { .. }), "{err}");
    assert!(err.to_string().contains("verbosity"), "unexpected err: {err}");
}

#[test]
fn golden_unknown_stereo_mode_is_rejected() {
    let path = write_temp_fixture("unknown_stereo", UNKNOWN_STEREO_JSON);
    let err = load_pipeline_config_from(&path).expect_err("unknown stereo mode must fail");
    let _ = fs::remove_file(path);

    assert!(matches!(err, ImagingError::Json { .. }), "{err}");
    assert!(err.to_string().contains("holographic"), "unexpected err: {err}");
}

#[test]
fn missing_config_file_reports_the_path() {
    let path = std::env::temp_dir().join("stimpipe_contract_tests_does_not_exist.json");
    let err = load_pipeline_config_from(&path).expect_err("missing file");
    assert!(matches!(err, ImagingError::Io { .. }));
    assert!(err.to_string().contains("does_not_exist"), "unexpected err: {err}");
}

#[test]
fn config_survives_a_json_round_trip() {
    let path = write_temp_fixture("anaglyph_rt", ANAGLYPH_JSON);
    let cfg = load_pipeline_config_from(&path).unwrap();
    let _ = fs::remove_file(path);

    let text = serde_json::to_string(&cfg).unwrap();
    let value: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(value["imaging_mode"], 770);
    let path = write_temp_fixture("anaglyph_rt2", &text);
    assert_eq!(load_pipeline_config_from(&path).unwrap(), cfg);
    let _ = fs::remove_file(path);
}
