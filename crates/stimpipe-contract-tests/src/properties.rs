use stimpipe_core::{FboStatus, ImagingError, ImagingMode, PipelineConfig, StereoMode, WindowInfo};
use stimpipe_hooks::{HookChains, HookCommand, HookKind, HookPoint, InsertPosition, NativeCallback};
use stimpipe_runtime::{
    create_fbo, ChainOptions, ChainTargets, ColorFormat, DepthFormat, Executor, Fbo, FboRequest, GammaState,
    GlDevice, NoHostRuntime, RenderStateCache, ShaderCache, TexTarget, SYSTEM_SLOT,
};

use crate::support::window;
use crate::RecordingDevice;

const FORMATS: [ColorFormat; 5] = [
    ColorFormat::Rgba8,
    ColorFormat::Rgba16,
    ColorFormat::Rgba16Snorm,
    ColorFormat::Rgba16F,
    ColorFormat::Rgba32F,
];

#[test]
fn every_returned_fbo_is_complete() {
    let mut dev = RecordingDevice::new().with_max_samples(4);
    for format in FORMATS {
        for samples in [0, 2, 4] {
            for depth in [false, true] {
                for ms_texture in [false, true] {
                    let req = FboRequest {
                        multisample_texture: ms_texture,
                        ..FboRequest::color(format, 320, 200)
                            .with_depth_stencil(depth)
                            .with_samples(samples)
                    };
                    let fbo = create_fbo(&mut dev, &req, "grid", false).expect("allocation");
                    assert_eq!(dev.bound_framebuffer(), 0, "factory must leave framebuffer 0 bound");
                    dev.bind_framebuffer(fbo.framebuffer);
                    assert_eq!(
                        dev.framebuffer_status(),
                        FboStatus::Complete,
                        "{format:?} x{samples} depth={depth} ms_texture={ms_texture}"
                    );
                    dev.bind_framebuffer(0);
                    assert_eq!(fbo.samples, samples);
                    assert_eq!(fbo.depth_format.is_some(), depth);
                }
            }
        }
    }
}

#[test]
fn packed_depth_rejection_falls_back_to_separate_buffers() {
    let mut dev = RecordingDevice::new().rejecting_packed_depth();
    let req = FboRequest::color(ColorFormat::Rgba8, 64, 64).with_depth_stencil(true);
    let fbo = create_fbo(&mut dev, &req, "draw", false).expect("separate depth and stencil");
    assert_eq!(fbo.depth_format, Some(DepthFormat::Depth24));
    assert_ne!(fbo.stencil, 0);
}

#[test]
fn multisample_texture_rejection_keeps_the_sample_count() {
    let mut dev = RecordingDevice::new().rejecting_ms_textures();
    let req = FboRequest {
        multisample_texture: true,
        ..FboRequest::color(ColorFormat::Rgba8, 64, 64).with_samples(4)
    };
    let fbo = create_fbo(&mut dev, &req, "draw", false).expect("renderbuffer fallback");
    assert!(fbo.color_is_renderbuffer);
    assert_eq!(fbo.samples, 4);
}

#[test]
fn unrenderable_format_exhausts_the_ladder_and_frees_everything() {
    let mut dev = RecordingDevice::new().with_renderable(&[ColorFormat::Rgba8]);
    let req = FboRequest::color(ColorFormat::Rgba32F, 64, 64)
        .with_depth_stencil(true)
        .with_samples(2);
    let err = create_fbo(&mut dev, &req, "processed", false).expect_err("no usable combination");
    assert!(matches!(
        err,
        ImagingError::FboAllocation {
            status: FboStatus::Unsupported,
            ..
        }
    ));
    assert!(err.to_string().contains("processed"));
    assert_eq!(dev.live_objects(), 0);
}

#[test]
fn sample_fallback_terminates_at_or_below_the_working_maximum() {
    for limit in [0, 2, 8] {
        for requested in 0..=16u32 {
            let mut dev = RecordingDevice::new().with_max_samples(8).with_sample_limit(limit);
            let req = FboRequest::color(ColorFormat::Rgba8, 32, 32)
                .with_depth_stencil(true)
                .with_samples(requested);
            let fbo = create_fbo(&mut dev, &req, "draw", false).expect("some sample count works");
            assert!(fbo.samples <= limit, "requested {requested}, limit {limit}, got {}", fbo.samples);
            assert_eq!(fbo.samples, requested.min(limit));
            assert_eq!(fbo.depth_format, Some(DepthFormat::Depth24Stencil8));
        }
    }
}

#[test]
fn pass_through_stages_alias_their_upstream_slot() {
    let modes = [
        ImagingMode::empty(),
        ImagingMode::NEED_IMAGE_PROCESSING,
        ImagingMode::NEED_OUTPUT_CONVERSION,
        ImagingMode::NEED_IMAGE_PROCESSING | ImagingMode::NEED_OUTPUT_CONVERSION,
    ];
    for mode in modes {
        for multisample in [0, 4] {
            let cfg = PipelineConfig {
                multisample,
                ..PipelineConfig::with_mode(mode)
            };
            let w = window(WindowInfo::new(640, 480), cfg);
            let t = w.fbos();
            let processing = mode.contains(ImagingMode::NEED_IMAGE_PROCESSING);

            assert_eq!(t.input[0] == t.draw[0], multisample == 0, "{mode:?} x{multisample}");
            assert_eq!(t.processed[0] == t.input[0], !processing, "{mode:?} x{multisample}");
            assert_eq!(t.pre_conversion[0], t.processed[0]);
            assert_eq!(t.finalized[0], Some(SYSTEM_SLOT));

            let expected = 1 + usize::from(multisample > 0) + usize::from(processing);
            assert_eq!(t.allocated(), expected, "{mode:?} x{multisample}: {}", t.describe());
        }
    }
}

#[test]
fn bounce_sharing_needs_matching_geometry_and_an_allowed_mode() {
    let mode = ImagingMode::NEED_IMAGE_PROCESSING | ImagingMode::NEED_DUAL_PASS;
    let compressed = WindowInfo::new(800, 600).with_stereo(StereoMode::CompressedTopLeftBottomRight);

    let w = window(compressed.clone(), PipelineConfig::with_mode(mode));
    assert!(w.fbos().processed[2].is_some());
    assert_eq!(w.fbos().pre_conversion[2], w.fbos().processed[2]);

    let cfg = PipelineConfig {
        bounce_share_excluded: vec![StereoMode::CompressedTopLeftBottomRight],
        ..PipelineConfig::with_mode(mode)
    };
    let w = window(compressed, cfg);
    assert_ne!(w.fbos().pre_conversion[2], w.fbos().processed[2]);

    // Half-width views never match the full-width merge target.
    let cfg = PipelineConfig {
        bounce_share_excluded: Vec::new(),
        ..PipelineConfig::with_mode(mode)
    };
    let w = window(WindowInfo::new(800, 600).with_stereo(StereoMode::FreeFusion), cfg);
    assert_ne!(w.fbos().pre_conversion[2], w.fbos().processed[2]);
}

fn identity_chain(markers: usize) -> HookChains {
    let mut chains = HookChains::new();
    let hook = HookPoint::FinalOutputFormattingBlit;
    for i in 0..=markers {
        if i > 0 {
            chains.add_entry(hook, "Builtin:FlipFBOs", InsertPosition::Append, HookKind::builtin("FlipFBOs", "").unwrap());
        }
        chains.add_entry(
            hook,
            format!("pass {i}"),
            InsertPosition::Append,
            HookKind::builtin("IdentityBlit", "").unwrap(),
        );
    }
    chains.enable(hook);
    chains
}

#[test]
fn final_pass_always_lands_in_the_destination() {
    for markers in 0..6 {
        let mut dev = RecordingDevice::new();
        let mut make = || create_fbo(&mut dev, &FboRequest::color(ColorFormat::Rgba8, 64, 48), "test", false).unwrap();
        let fbos: [Fbo; 4] = [make(), make(), make(), make()];
        let [src, dst, b0, b1] = &fbos;
        let chains = identity_chain(markers);

        let mut shaders = ShaderCache::new();
        let mut state = RenderStateCache::default();
        let mut host = NoHostRuntime;
        let mut gamma = GammaState::default();
        dev.clear_calls();
        let targets = ChainTargets {
            src1: Some(src),
            src2: None,
            dst: Some(dst),
            bounce: [Some(b0), Some(b1)],
        };
        let mut exec = Executor {
            dev: &mut dev,
            chains: &chains,
            shaders: &mut shaders,
            state: &mut state,
            host: &mut host,
            gamma: &mut gamma,
            flip_count: 0,
            trace: false,
        };
        exec.execute_chain(HookPoint::FinalOutputFormattingBlit, &targets, ChainOptions::default(), None)
            .expect("chain runs");

        let draws = dev.draws();
        assert_eq!(draws.len(), markers + 1);
        assert_eq!(draws[markers].framebuffer, dst.framebuffer, "{markers} markers");
        assert_eq!(draws[0].source, src.color);
        let color_of = |fb: u32| fbos.iter().find(|f| f.framebuffer == fb).map(|f| f.color);
        for d in &draws {
            assert_ne!(Some(d.source), color_of(d.framebuffer), "a pass read its own target");
        }
        for pair in draws.windows(2) {
            assert_eq!(Some(pair[1].source), color_of(pair[0].framebuffer));
        }
        assert_eq!(dev.bound_framebuffer(), 0);
    }
}

#[test]
fn three_passes_may_borrow_the_destination_as_second_bounce() {
    let mut dev = RecordingDevice::new();
    let mut make = || create_fbo(&mut dev, &FboRequest::color(ColorFormat::Rgba8, 64, 48), "test", false).unwrap();
    let (src, dst, b0) = (make(), make(), make());
    let chains = identity_chain(2);
    let mut shaders = ShaderCache::new();
    let mut state = RenderStateCache::default();
    let mut host = NoHostRuntime;
    let mut gamma = GammaState::default();
    dev.clear_calls();

    let targets = ChainTargets {
        src1: Some(&src),
        src2: None,
        dst: Some(&dst),
        bounce: [Some(&b0), None],
    };
    let swizzle = ChainOptions {
        src_readonly: true,
        allow_swizzle: true,
    };
    let mut exec = Executor {
        dev: &mut dev,
        chains: &chains,
        shaders: &mut shaders,
        state: &mut state,
        host: &mut host,
        gamma: &mut gamma,
        flip_count: 0,
        trace: false,
    };
    exec.execute_chain(HookPoint::FinalOutputFormattingBlit, &targets, swizzle, None)
        .expect("destination doubles as bounce buffer");
    let targets: Vec<u32> = dev.draws().iter().map(|d| d.framebuffer).collect();
    assert_eq!(targets, vec![dst.framebuffer, b0.framebuffer, dst.framebuffer]);
}

#[test]
fn query_descriptor_recreates_the_entry_at_its_index() {
    let hook = HookPoint::StereoLeftCompositingBlit;
    let mut chains = HookChains::new();
    chains.add_entry(hook, "copy", InsertPosition::Append, HookKind::builtin("IdentityBlit", "").unwrap());
    chains.add_entry(hook, "shift", InsertPosition::Append, HookKind::shader(7, "Offset:1:2", 0).unwrap());
    chains.add_entry(hook, "notify", InsertPosition::Append, HookKind::runtime("onBlit()"));
    chains.add_entry(
        hook,
        "probe",
        InsertPosition::At(1),
        HookKind::native(NativeCallback::new(|_| true), "p"),
    );

    for i in 0..chains.entries(hook).len() {
        let slot = chains.query(hook, &i.to_string()).expect("slot by index");
        let HookCommand::Add { position, kind } = HookCommand::parse(&slot.insert_descriptor()).unwrap() else {
            panic!("descriptor '{}' is not an add command", slot.insert_descriptor());
        };
        assert_eq!(position, InsertPosition::At(i));
        assert_eq!(kind, slot.entry.kind.tag());

        let mut rebuilt = chains.clone();
        rebuilt.remove_entry(hook, i);
        let at = rebuilt.add_entry(hook, slot.entry.name.clone(), position, slot.entry.kind.clone());
        assert_eq!(at, i);
        assert_eq!(rebuilt.entries(hook)[i].name, slot.entry.name);
        assert_eq!(rebuilt.entries(hook)[i].kind.tag(), kind);
    }

    assert_eq!(chains.query(hook, "notify").map(|s| s.index), Some(3));
    assert!(chains.query(hook, "9").is_none());
}

#[test]
fn geometry_list_handles_round_trip_through_the_device() {
    let mut dev = RecordingDevice::new();
    let fbo = create_fbo(&mut dev, &FboRequest::color(ColorFormat::Rgba8, 16, 16), "t", false).unwrap();
    assert_eq!(fbo.target, TexTarget::Rect);
    let list = dev.create_geometry_list(&[]).unwrap();
    assert!(dev.draw_geometry_list(list, &stimpipe_runtime::Affine2::IDENTITY).is_ok());
    dev.delete_geometry_list(list);
    assert!(dev.draw_geometry_list(list, &stimpipe_runtime::Affine2::IDENTITY).is_err());
}
