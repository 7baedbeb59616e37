use std::cell::RefCell;
use std::rc::Rc;

use stimpipe_core::{ImagingError, ImagingMode, PipelineConfig, StereoMode, WindowInfo};
use stimpipe_hooks::{HookPoint, InsertPosition, NativeCallback};
use stimpipe_runtime::{
    ColorFormat, CommandReply, GammaTable, GlDevice, HostRuntime, HostValue, ImagingWindow, Orientation,
    StorageFormat, TexTarget, TextureRecord,
};

use crate::support::{window, window_on};
use crate::{DrawKind, RecordingDevice};

/// Host runtime that remembers what it was asked to evaluate.
#[derive(Debug, Default)]
struct ScriptLog {
    evaluated: Rc<RefCell<Vec<String>>>,
}

impl HostRuntime for ScriptLog {
    fn evaluate(&mut self, code: &str) -> Result<(), ImagingError> {
        self.evaluated.borrow_mut().push(code.to_string());
        Ok(())
    }

    fn set_named_variable(&mut self, _scope: &str, _name: &str, _value: HostValue) -> Result<(), ImagingError> {
        Ok(())
    }
}

#[test]
fn pass_through_frame_copies_the_draw_buffer_to_the_screen() {
    let mut w = window(WindowInfo::new(640, 480), PipelineConfig::default());
    let draw = w.fbos().get(w.fbos().draw[0].unwrap()).unwrap().color;
    w.device_mut().clear_calls();

    let report = w.process_frame().expect("frame");
    assert!(report.is_clean());
    assert_eq!(report.stages, vec![HookPoint::IdentityBlitChain]);
    assert_eq!(report.flip_count, 1);
    assert_eq!(w.flip_count(), 1);

    let draws = w.device().draws();
    assert_eq!(draws.len(), 1);
    assert_eq!((draws[0].framebuffer, draws[0].source), (0, draw));
}

#[test]
fn frames_need_a_configured_pipeline() {
    let mut w = ImagingWindow::new(RecordingDevice::new(), WindowInfo::new(640, 480));
    assert!(matches!(w.process_frame(), Err(ImagingError::Precondition(_))));
    assert!(w.begin_view(0).is_err());
}

#[test]
fn failing_entry_costs_its_chain_but_not_the_frame() {
    let mut w = window(WindowInfo::new(640, 480), PipelineConfig::default());
    w.hook_command(
        "AppendRuntimeFunction",
        "PreSwapbuffersOperations",
        &["notify", "onFlip(IMAGINGPIPE_FLIPCOUNT)"],
    )
    .unwrap();
    w.hook_command("Enable", "PreSwapbuffersOperations", &[]).unwrap();

    let report = w.process_frame().expect("entry failures are not fatal");
    assert_eq!(report.failures.len(), 1);
    assert!(matches!(report.failures[0], ImagingError::EntryFailed { .. }));
    assert!(report.failures[0].to_string().contains("notify"));
    assert_eq!(w.flip_count(), 1);
}

#[test]
fn runtime_callbacks_see_the_flip_counter() {
    let mut w = window(WindowInfo::new(640, 480), PipelineConfig::default());
    let evaluated = Rc::new(RefCell::new(Vec::new()));
    w.set_host_runtime(Box::new(ScriptLog {
        evaluated: evaluated.clone(),
    }));
    w.hook_command(
        "AppendRuntimeFunction",
        "PreSwapbuffersOperations",
        &["notify", "onFlip(IMAGINGPIPE_FLIPCOUNT)"],
    )
    .unwrap();
    w.hook_command("Enable", "PreSwapbuffersOperations", &[]).unwrap();

    for _ in 0..2 {
        assert!(w.process_frame().unwrap().is_clean());
    }
    assert_eq!(*evaluated.borrow(), vec!["onFlip(0)".to_string(), "onFlip(1)".to_string()]);
}

#[test]
fn clut_encoder_writes_the_loaded_gamma_table_into_the_top_row() {
    let mut w = window(WindowInfo::new(1024, 768), PipelineConfig::default());
    w.hook_command("AppendBuiltin", "LeftFinalizerBlitChain", &["RenderClutBits++"])
        .unwrap();
    w.hook_command("Enable", "LeftFinalizerBlitChain", &[]).unwrap();

    let report = w.process_frame().unwrap();
    assert_eq!(report.failures.len(), 1, "no gamma table loaded yet");

    w.set_pending_gamma_table(GammaTable::linear(256));
    w.device_mut().clear_calls();
    let report = w.process_frame().unwrap();
    assert!(report.is_clean(), "{:?}", report.failures);
    let rows: Vec<_> = w
        .device()
        .draws()
        .into_iter()
        .filter(|d| matches!(d.kind, DrawKind::PixelRow { .. }))
        .cloned()
        .collect();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].framebuffer, 0);
    assert_eq!(rows[0].kind, DrawKind::PixelRow { x: 0, y: 0, pixels: 8 + 2 * 256 });
}

#[test]
fn native_stereo_sync_lines_draw_into_both_back_buffers() {
    let cfg = PipelineConfig {
        stereo_sync_lines: true,
        ..PipelineConfig::default()
    };
    let mut w = window(WindowInfo::new(800, 600).with_stereo(StereoMode::OpenGl), cfg);
    w.device_mut().clear_calls();
    let report = w.process_frame().unwrap();
    assert!(report.stages.contains(&HookPoint::LeftFinalizerBlitChain));
    assert!(report.stages.contains(&HookPoint::RightFinalizerBlitChain));
    let solids = w
        .device()
        .draws()
        .iter()
        .filter(|d| matches!(d.kind, DrawKind::Solid { .. }))
        .count();
    assert_eq!(solids, 4);
}

#[test]
fn shutdown_runs_pre_gl_then_post_gl_and_frees_everything() {
    let mut w = window(
        WindowInfo::new(800, 600).with_stereo(StereoMode::AnaglyphRedBlue),
        PipelineConfig::with_mode(ImagingMode::NEED_IMAGE_PROCESSING | ImagingMode::NEED_DUAL_PASS),
    );
    let order = Rc::new(RefCell::new(Vec::new()));
    for (hook, tag) in [
        (HookPoint::CloseOnscreenWindowPreGLShutdown, "pre"),
        (HookPoint::CloseOnscreenWindowPostGLShutdown, "post"),
    ] {
        let seen = order.clone();
        w.add_native_hook(
            hook,
            tag,
            InsertPosition::Append,
            NativeCallback::new(move |_| {
                seen.borrow_mut().push(tag);
                true
            }),
            "",
        );
        w.hooks_mut().enable(hook);
    }
    assert!(w.device().live_objects() > 0);

    assert!(matches!(w.shutdown_bookkeeping(), Err(ImagingError::Precondition(_))));
    assert!(order.borrow().is_empty());

    w.shutdown_pipeline(true).expect("GL teardown");
    assert_eq!(w.device().live_objects(), 0);
    assert_eq!(*order.borrow(), vec!["pre"]);

    w.shutdown_pipeline(false).expect("bookkeeping teardown");
    assert_eq!(*order.borrow(), vec!["pre", "post"]);
    assert!(!w.is_configured());
    assert!(w.hooks().entries(HookPoint::CloseOnscreenWindowPreGLShutdown).is_empty());
    assert!(w.configure(PipelineConfig::default()).is_err(), "context is gone");
}

#[test]
fn reconfiguring_replaces_the_previous_setup() {
    let info = WindowInfo::new(800, 600).with_stereo(StereoMode::AnaglyphGreenRed);
    let cfg = PipelineConfig::with_mode(ImagingMode::NEED_IMAGE_PROCESSING);
    let mut w = window(info, cfg.clone());
    let live = w.device().live_objects();
    let entries = w.hooks().entries(HookPoint::StereoCompositingBlit).len();

    w.configure(cfg).unwrap();
    assert_eq!(w.device().live_objects(), live);
    assert_eq!(w.hooks().entries(HookPoint::StereoCompositingBlit).len(), entries);
}

#[test]
fn failed_setup_leaves_nothing_allocated() {
    let dev = RecordingDevice::new().failing_compiles();
    let mut w = ImagingWindow::new(dev, WindowInfo::new(800, 600).with_stereo(StereoMode::AnaglyphRedGreen));
    let err = w.configure(PipelineConfig::default()).expect_err("shader build fails");
    assert!(matches!(err, ImagingError::FragmentCompile(_)), "{err}");
    assert!(!w.is_configured());
    assert_eq!(w.device().live_objects(), 0);
    assert_eq!(w.fbos().allocated(), 0);
}

#[test]
fn subcommands_edit_and_query_chains() {
    let mut w = window(WindowInfo::new(640, 480), PipelineConfig::default());
    let hook = "StereoLeftCompositingBlit";
    assert_eq!(
        w.hook_command("AppendShader", hook, &["Shift", "5", "Offset:10:0"]).unwrap(),
        CommandReply::Slot(0)
    );
    assert_eq!(
        w.hook_command("InsertAt0Builtin", hook, &["RestrictToScissorRect", "0:0:320:240"])
            .unwrap(),
        CommandReply::Slot(0)
    );

    let CommandReply::Query { descriptor, name, payload } = w.hook_command("Query", hook, &["Shift"]).unwrap() else {
        panic!("Shift should be found");
    };
    assert_eq!(descriptor, "InsertAt1Shader");
    assert_eq!(name, "Shift");
    assert!(payload.contains("Offset:10:0"), "{payload}");

    assert_eq!(
        w.hook_command("Edit", hook, &["Shift", "Offset:20:0 Bilinear"]).unwrap(),
        CommandReply::Slot(1)
    );
    assert!(w.hook_command("Edit", hook, &["Shift", "Offset:x"]).is_err());
    assert_eq!(w.hook_command("Query", hook, &["Nope"]).unwrap(), CommandReply::NotFound);

    w.hook_command("Remove", hook, &["0"]).unwrap();
    assert_eq!(w.hooks().entries(HookPoint::StereoLeftCompositingBlit).len(), 1);

    let CommandReply::Text(all) = w.hook_command("ListAll", "", &[]).unwrap() else {
        panic!("ListAll returns text");
    };
    assert!(all.contains("PreSwapbuffersOperations"));
}

#[test]
fn bad_names_fail_loudly() {
    let mut w = window(WindowInfo::new(640, 480), PipelineConfig::default());
    assert!(matches!(
        w.hook_command("AppendBuiltin", "StereoLeftCompositingBlitt", &["IdentityBlit"]),
        Err(ImagingError::UnknownHook(_))
    ));
    assert!(matches!(
        w.hook_command("AppendBuiltin", "StereoLeftCompositingBlit", &["IdentityBlitz"]),
        Err(ImagingError::UnknownBuiltin(_))
    ));
    assert!(matches!(
        w.hook_command("AppendNativeFunction", "StereoLeftCompositingBlit", &["f"]),
        Err(ImagingError::Unsupported(_))
    ));
    assert!(w.hook_command("Frobnicate", "StereoLeftCompositingBlit", &[]).is_err());
}

#[test]
fn proxy_imaging_mode_is_settable_only_before_configuration() {
    let mut proxy = ImagingWindow::new(RecordingDevice::new(), WindowInfo::new(256, 256));
    assert_eq!(
        proxy.hook_command("ImagingMode", "", &["514"]).unwrap(),
        CommandReply::Mode(ImagingMode::empty())
    );
    assert_eq!(
        proxy.imaging_mode(),
        ImagingMode::NEED_IMAGE_PROCESSING | ImagingMode::NEED_MULTI_PASS
    );

    let mut w = window(WindowInfo::new(256, 256), PipelineConfig::default());
    assert!(w.hook_command("ImagingMode", "", &["2"]).is_err());
}

#[test]
fn user_defined_blit_transforms_one_texture_into_another() {
    let mut proxy = ImagingWindow::new(RecordingDevice::new(), WindowInfo::new(256, 256));
    proxy.set_imaging_mode(ImagingMode::NEED_DUAL_PASS).unwrap();
    for op in ["IdentityBlit", "FlipFBOs", "IdentityBlit"] {
        proxy.hook_command("AppendBuiltin", "UserDefinedBlit", &[op]).unwrap();
    }
    proxy.hook_command("Enable", "UserDefinedBlit", &[]).unwrap();

    let color = StorageFormat::Color(ColorFormat::Rgba8);
    let dev = proxy.device_mut();
    let src_tex = dev.create_texture(TexTarget::Rect, color, 128, 64, 0).unwrap();
    let dst_tex = dev.create_texture(TexTarget::Rect, color, 128, 64, 0).unwrap();
    let mut src = TextureRecord::new(src_tex, TexTarget::Rect, ColorFormat::Rgba8, 128, 64);
    let mut dst = TextureRecord::new(dst_tex, TexTarget::Rect, ColorFormat::Rgba8, 128, 64);
    dev.clear_calls();

    proxy.transform_texture(&mut src, &mut dst).expect("transform");
    let dst_fb = dst.shadow.as_ref().expect("dst shadow").framebuffer;
    let draws = proxy.device().draws();
    assert_eq!(draws.len(), 2);
    assert_eq!(draws[0].source, src_tex);
    assert_eq!(draws[1].framebuffer, dst_fb);
    assert_ne!(draws[1].source, src_tex);

    // Two textures and their shadow framebuffers; the bounce buffer is gone.
    assert_eq!(proxy.device().live_objects(), 4);
}

#[test]
fn flipped_textures_are_redrawn_upright() {
    let mut proxy = ImagingWindow::new(RecordingDevice::new(), WindowInfo::new(256, 256));
    let color = StorageFormat::Color(ColorFormat::Rgba8);
    let tex = proxy
        .device_mut()
        .create_texture(TexTarget::Rect, color, 32, 16, 0)
        .unwrap();
    let mut rec =
        TextureRecord::new(tex, TexTarget::Rect, ColorFormat::Rgba8, 32, 16).with_orientation(Orientation::FlippedVertical);

    assert_eq!(proxy.normalize_texture(&mut rec).unwrap(), Some(tex));
    assert!(rec.is_normalized());
    assert_ne!(rec.texture, tex);
    assert!(proxy.device().is_texture(rec.texture));
    assert_eq!(proxy.normalize_texture(&mut rec).unwrap(), None);
}

#[test]
fn begin_view_targets_the_draw_buffer() {
    let mut w = window(
        WindowInfo::new(640, 480),
        PipelineConfig::with_mode(ImagingMode::NEED_IMAGE_PROCESSING),
    );
    let fb = w.fbos().get(w.fbos().draw[0].unwrap()).unwrap().framebuffer;
    w.begin_view(0).unwrap();
    assert_eq!(w.device().bound_framebuffer(), fb);
    assert!(w.begin_view(1).is_err());
}

#[test]
fn configured_mode_carries_the_implied_backing_store_bit() {
    let w = window_on(
        RecordingDevice::new(),
        WindowInfo::new(640, 480),
        PipelineConfig::with_mode(ImagingMode::NEED_OUTPUT_CONVERSION),
    );
    let mode = w.imaging_mode();
    assert!(mode.contains(ImagingMode::NEED_OUTPUT_CONVERSION | ImagingMode::NEED_FAST_BACKING_STORE));
}
