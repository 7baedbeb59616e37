use glow::HasContext;
use stimpipe_core::{load_pipeline_config_from, ImagingError, PipelineConfig, StereoMode, WindowInfo};
use stimpipe_runtime::{GlDevice, ImagingWindow};
use stimpipe_runtime_glow::GlowDevice;

use std::ffi::CString;
use std::num::NonZeroU32;
use std::time::Instant;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use winit::event::{Event, WindowEvent};
use winit::event_loop::{ControlFlow, EventLoop};
use winit::window::WindowBuilder;

use glutin::display::GetGlDisplay;
use glutin::prelude::*;
use raw_window_handle::HasRawWindowHandle;

/// Horizontal offset between the two views of the square, in pixels.
const DISPARITY: f32 = 24.0;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(e) = run() {
        error!(%e, "anaglyph_stereo failed");
        std::process::exit(1);
    }
}

fn load_config() -> Result<PipelineConfig, ImagingError> {
    match std::env::args().nth(1) {
        Some(path) => load_pipeline_config_from(path),
        None => Ok(PipelineConfig::default()),
    }
}

fn run() -> Result<(), ImagingError> {
    let config = load_config()?;
    let event_loop = EventLoop::new();

    let window_builder = WindowBuilder::new()
        .with_title("stimpipe: red-green anaglyph")
        .with_resizable(false)
        .with_inner_size(winit::dpi::LogicalSize::new(960.0, 540.0));

    let template = glutin::config::ConfigTemplateBuilder::new().with_alpha_size(8);

    let display_builder =
        glutin_winit::DisplayBuilder::new().with_window_builder(Some(window_builder));

    let (window, gl_config) = display_builder
        .build(&event_loop, template, |configs| {
            configs
                .reduce(|best, c| if c.num_samples() < best.num_samples() { c } else { best })
                .expect("display offered no GL configs")
        })
        .map_err(|e| ImagingError::GlCreate(format!("DisplayBuilder.build: {e}")))?;

    let window = window
        .ok_or_else(|| ImagingError::GlCreate("DisplayBuilder did not create a window".into()))?;
    let gl_display = gl_config.display();

    let raw_window_handle = window.raw_window_handle();

    let context_attributes = glutin::context::ContextAttributesBuilder::new()
        .with_profile(glutin::context::GlProfile::Core)
        .build(Some(raw_window_handle));

    let not_current_gl_context = unsafe {
        gl_display
            .create_context(&gl_config, &context_attributes)
            .map_err(|e| ImagingError::GlCreate(format!("create_context: {e}")))?
    };

    let size = window.inner_size();
    let (w, h) = match (NonZeroU32::new(size.width), NonZeroU32::new(size.height)) {
        (Some(w), Some(h)) => (w, h),
        _ => return Err(ImagingError::Precondition("window has no drawable area".into())),
    };
    let attrs = glutin::surface::SurfaceAttributesBuilder::<glutin::surface::WindowSurface>::new()
        .build(raw_window_handle, w, h);

    let gl_surface = unsafe {
        gl_display
            .create_window_surface(&gl_config, &attrs)
            .map_err(|e| ImagingError::GlCreate(format!("create_window_surface: {e}")))?
    };

    let gl_context = not_current_gl_context
        .make_current(&gl_surface)
        .map_err(|e| ImagingError::GlCreate(format!("make_current: {e}")))?;

    let gl = unsafe {
        glow::Context::from_loader_function(|s| match CString::new(s) {
            Ok(name) => gl_display.get_proc_address(name.as_c_str()) as *const _,
            Err(_) => std::ptr::null(),
        })
    };

    let device = unsafe { GlowDevice::new(gl)? };
    let info = WindowInfo::new(w.get() as i32, h.get() as i32).with_stereo(StereoMode::AnaglyphRedGreen);
    let mut pipe = ImagingWindow::new(device, info);
    let layout = pipe.configure(config)?;
    info!(
        mode = layout.mode.bits(),
        fallbacks = layout.fallbacks.len(),
        "pipeline ready"
    );

    let start = Instant::now();

    event_loop.run(move |event, _, control_flow| {
        *control_flow = ControlFlow::Poll;

        match event {
            Event::WindowEvent {
                event: WindowEvent::CloseRequested,
                ..
            } => {
                if let Err(e) = pipe.shutdown_pipeline(true) {
                    error!(%e, "GL teardown");
                }
                unsafe { pipe.device_mut().destroy() };
                if let Err(e) = pipe.shutdown_pipeline(false) {
                    error!(%e, "bookkeeping teardown");
                }
                *control_flow = ControlFlow::Exit;
            }

            Event::MainEventsCleared => window.request_redraw(),

            Event::RedrawRequested(_) => {
                if !pipe.is_configured() {
                    return;
                }
                let t = start.elapsed().as_secs_f32();
                if let Err(e) = draw_frame(&mut pipe, t) {
                    error!(%e, "frame failed");
                    *control_flow = ControlFlow::Exit;
                    return;
                }
                if let Err(e) = gl_surface.swap_buffers(&gl_context) {
                    error!(%e, "swap_buffers");
                    *control_flow = ControlFlow::Exit;
                    return;
                }
                if let Err(e) = pipe.after_flip() {
                    error!(%e, "post-flip operations");
                }
            }

            _ => {}
        }
    });
}

/// Draw both views of a square floating in front of the screen, then run the pipeline.
fn draw_frame(pipe: &mut ImagingWindow<GlowDevice>, t: f32) -> Result<(), ImagingError> {
    let (w, h) = pipe.layout().map_or((1, 1), |l| l.draw_size);
    let (w, h) = (w as f32, h as f32);
    let side = h * 0.3;
    let x = w * 0.5 + (t * 0.8).sin() * w * 0.25 - side * 0.5;
    let y = h * 0.5 - side * 0.5;

    for view in 0..pipe.info().view_count() {
        pipe.begin_view(view)?;
        let dev = pipe.device_mut();
        unsafe {
            let gl = dev.gl();
            gl.clear_color(0.05, 0.05, 0.05, 1.0);
            gl.clear(glow::COLOR_BUFFER_BIT | glow::DEPTH_BUFFER_BIT);
        }
        // crossed disparity: left view shifted right
        let dx = if view == 0 { DISPARITY * 0.5 } else { -DISPARITY * 0.5 };
        dev.draw_solid_rect([x + dx, y, x + dx + side, y + side], [1.0, 1.0, 1.0, 1.0]);
    }

    let report = pipe.process_frame()?;
    for failure in &report.failures {
        error!(%failure, flip = report.flip_count, "hook chain entry failed");
    }
    Ok(())
}
