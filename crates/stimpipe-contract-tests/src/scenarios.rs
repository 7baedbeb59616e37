use stimpipe_core::{GfxCaps, ImagingError, ImagingMode, PipelineConfig, StereoMode, WindowInfo};
use stimpipe_hooks::{HookKind, HookPoint};
use stimpipe_runtime::{ChainOptions, ColorFormat, SlotTargets, Uniform, SYSTEM_SLOT};

use crate::support::{window, window_on, with_captured_logs};
use crate::RecordingDevice;

#[test]
fn image_processing_gets_its_own_buffer_and_ends_in_the_system_framebuffer() {
    let w = window(
        WindowInfo::new(1024, 768),
        PipelineConfig::with_mode(ImagingMode::NEED_IMAGE_PROCESSING),
    );
    let t = w.fbos();
    let (draw, processed) = (t.draw[0].expect("draw buffer"), t.processed[0].expect("processed buffer"));
    assert_ne!(draw, processed);
    assert_ne!(t.get(draw).unwrap().framebuffer, t.get(processed).unwrap().framebuffer);
    assert_eq!(t.finalized[0], Some(SYSTEM_SLOT));
    assert!(t.get(SYSTEM_SLOT).unwrap().is_system());
}

#[test]
fn no_features_means_one_buffer_passed_straight_through() {
    let w = window(WindowInfo::new(1024, 768), PipelineConfig::default());
    let t = w.fbos();
    assert!(t.draw[0].is_some());
    assert_eq!(t.processed[0], t.input[0]);
    assert_eq!(t.input[0], t.draw[0]);
    assert_eq!(t.allocated(), 1);
}

#[test]
fn red_green_anaglyph_wires_an_enabled_compositing_shader() {
    let w = window(
        WindowInfo::new(800, 600).with_stereo(StereoMode::AnaglyphRedGreen),
        PipelineConfig::default(),
    );
    let hooks = w.hooks();
    assert!(hooks.is_enabled(HookPoint::StereoCompositingBlit));
    let entry = hooks
        .entries(HookPoint::StereoCompositingBlit)
        .iter()
        .find(|e| e.name == "StereoCompositingShaderAnaglyph")
        .expect("anaglyph entry");
    let HookKind::Shader { program, .. } = entry.kind else {
        panic!("anaglyph entry is not a shader: {:?}", entry.kind);
    };
    let dev = w.device();
    assert_eq!(dev.uniform(program, "Gains1"), Some(&Uniform::Vec3([1.0, 0.0, 0.0])));
    assert_eq!(dev.uniform(program, "Gains2"), Some(&Uniform::Vec3([0.0, 1.0, 0.0])));
    assert!(w.layout().unwrap().mode.contains(ImagingMode::NEED_STEREO_MERGE));
}

#[test]
fn anaglyph_frame_composites_both_views_into_the_system_framebuffer() {
    let mut w = window(
        WindowInfo::new(800, 600).with_stereo(StereoMode::AnaglyphRedGreen),
        PipelineConfig::default(),
    );
    w.device_mut().clear_calls();
    let report = w.process_frame().expect("frame");
    assert!(report.is_clean(), "{:?}", report.failures);
    assert_eq!(report.stages, vec![HookPoint::StereoCompositingBlit]);

    let t = w.fbos();
    let left = t.get(t.draw[0].unwrap()).unwrap().color;
    let draws = w.device().draws();
    assert_eq!(draws.len(), 1);
    assert_eq!(draws[0].framebuffer, 0);
    assert_eq!(draws[0].source, left);
    assert_ne!(draws[0].program, 0);
}

#[test]
fn three_pass_chain_with_one_bounce_buffer_names_the_multi_pass_flag() {
    let mut w = window(
        WindowInfo::new(640, 480),
        PipelineConfig::with_mode(ImagingMode::NEED_IMAGE_PROCESSING | ImagingMode::NEED_DUAL_PASS),
    );
    let hook = "StereoLeftCompositingBlit";
    for op in ["IdentityBlit", "FlipFBOs", "IdentityBlit", "FlipFBOs", "IdentityBlit"] {
        w.hook_command("AppendBuiltin", hook, &[op]).unwrap();
    }
    w.hook_command("Enable", hook, &[]).unwrap();
    w.device_mut().clear_calls();

    let t = w.fbos();
    let slots = SlotTargets {
        src1: t.input[0],
        src2: None,
        dst: t.processed[0],
        bounce: [t.processed[2], None],
    };
    let opts = ChainOptions {
        src_readonly: true,
        allow_swizzle: false,
    };
    let err = w
        .execute_hook(HookPoint::StereoLeftCompositingBlit, slots, opts, None)
        .expect_err("second bounce buffer is missing");
    assert!(matches!(err, ImagingError::ChainMismatch { .. }), "{err}");
    assert!(err.to_string().contains("multi-pass"), "{err}");
    assert!(w.device().draws().is_empty());
}

#[test]
fn asap_float_without_32bit_blending_draws_at_16bit_and_warns() {
    let dev = RecordingDevice::new().without_caps(GfxCaps::FLOAT_BLEND_32);
    let (w, logs) = with_captured_logs(|| {
        window_on(
            dev,
            WindowInfo::new(640, 480),
            PipelineConfig::with_mode(ImagingMode::USE_32BPC_FLOAT_ASAP | ImagingMode::NEED_IMAGE_PROCESSING),
        )
    });
    let layout = w.layout().unwrap();
    assert_eq!(layout.draw_format, ColorFormat::Rgba16F);
    assert_eq!(layout.processing_format, ColorFormat::Rgba32F);

    let t = w.fbos();
    assert_eq!(t.get(t.draw[0].unwrap()).unwrap().format, ColorFormat::Rgba16F);
    assert_eq!(t.get(t.processed[0].unwrap()).unwrap().format, ColorFormat::Rgba32F);

    assert_eq!(layout.fallbacks.len(), 1);
    let text = logs.text();
    assert!(text.contains("WARN"), "no warning logged: {text}");
    assert!(text.contains("no 32 bpc float blending"), "unexpected log: {text}");
}

#[test]
fn silent_verbosity_still_records_fallbacks() {
    let dev = RecordingDevice::new().without_caps(GfxCaps::FLOAT_BLEND_32);
    let cfg = PipelineConfig {
        verbosity: 0,
        ..PipelineConfig::with_mode(ImagingMode::USE_32BPC_FLOAT_ASAP)
    };
    let (w, logs) = with_captured_logs(|| window_on(dev, WindowInfo::new(640, 480), cfg));
    assert_eq!(w.layout().unwrap().fallbacks.len(), 1);
    assert!(!logs.text().contains("WARN"));
}
