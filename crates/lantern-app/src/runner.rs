//! Application runner and event loop.

use std::sync::Arc;
use std::time::Instant;

use ash::vk;
use lantern_gpu::{GpuContextBuilder, Severity};
use lantern_render::{
    overlay_for, FrameOutcome, FramePacer, FrameScheduler, Renderer, RendererConfig,
    SchedulerState, ShaderBlob, ShaderSet,
};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::{DeviceEvent, DeviceId, ElementState, KeyEvent, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowId};

use crate::app::LanternApp;
use crate::config::AppConfig;
use crate::context::AppContext;
use crate::input;

/// Run a LanternApp with the given configuration.
///
/// This function initializes logging, creates the window and renderer,
/// and runs the event loop until the window closes. A fatal error in
/// setup or in the frame loop ends the loop and is returned.
pub fn run_app<A: LanternApp + 'static>(config: AppConfig) -> anyhow::Result<()> {
    init_logging();

    info!("{} starting...", config.title);

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut runner = AppRunner::<A> {
        config,
        state: None,
        error: None,
    };

    event_loop.run_app(&mut runner)?;

    match runner.error.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // A subscriber may already be installed by an embedding process.
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Monitor refresh rate rounded to whole hertz.
fn refresh_rate_hz(window: &Window) -> Option<u32> {
    window
        .current_monitor()
        .and_then(|monitor| monitor.refresh_rate_millihertz())
        .map(|mhz| (mhz + 500) / 1000)
}

/// Internal application runner that implements winit's ApplicationHandler.
struct AppRunner<A: LanternApp> {
    config: AppConfig,
    state: Option<AppState<A>>,
    error: Option<anyhow::Error>,
}

/// Internal application state.
///
/// The scheduler owns the renderer and GPU context, so it is declared (and
/// dropped) before the context holding the window.
struct AppState<A: LanternApp> {
    scheduler: FrameScheduler<Renderer>,
    app: A,
    ctx: AppContext,
    last_frame_time: Instant,
}

impl<A: LanternApp + 'static> ApplicationHandler for AppRunner<A> {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.state.is_some() {
            return;
        }

        info!("Creating application state...");

        match self.create_state(event_loop) {
            Ok(state) => {
                self.state = Some(state);
                info!("Application ready!");
            }
            Err(e) => {
                error!("Failed to initialize application: {e:#}");
                self.error = Some(e);
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        let Some(state) = &mut self.state else {
            return;
        };

        // Let the app handle the event first
        if state.app.on_event(&state.ctx, &event) {
            return;
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested");
                state.scheduler.request_close();
            }
            WindowEvent::KeyboardInput { event, .. } => state.handle_key(&event),
            WindowEvent::Resized(size) => {
                state.scheduler.resize(size.width, size.height);
                state.app.on_resize(&state.ctx, size.width, size.height);
            }
            WindowEvent::RedrawRequested => {
                if let Err(e) = state.render_frame() {
                    error!("Render error: {e:#}");
                    self.error = Some(e);
                }
                state.ctx.window.request_redraw();
            }
            _ => {}
        }

        if self.error.is_some() || state.scheduler.state() == SchedulerState::ShouldBeClosed {
            self.close(event_loop);
        }
    }

    fn device_event(
        &mut self,
        _event_loop: &ActiveEventLoop,
        _device_id: DeviceId,
        event: DeviceEvent,
    ) {
        if let Some(state) = &self.state {
            if let Some(event) = input::device_event(&event) {
                state.ctx.events.push(event);
            }
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(state) = &self.state {
            state.ctx.window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(mut state) = self.state.take() {
            state.cleanup();
        }
    }
}

impl<A: LanternApp + 'static> AppRunner<A> {
    fn create_state(&self, event_loop: &ActiveEventLoop) -> anyhow::Result<AppState<A>> {
        let config = &self.config;

        // Load shaders before touching the GPU
        let shaders = ShaderSet {
            vertex: ShaderBlob::from_path(&config.vertex_shader)?,
            fragment: ShaderBlob::from_path(&config.fragment_shader)?,
        };

        // Create window
        let window_attrs = Window::default_attributes()
            .with_title(&config.title)
            .with_inner_size(PhysicalSize::new(config.width, config.height));

        let window = Arc::new(event_loop.create_window(window_attrs)?);

        // Create GPU context
        let gpu = GpuContextBuilder::new()
            .app_name(&config.title)
            .validation(config.validation)
            .selection(config.device.clone())
            .build(window.as_ref())?;

        info!("GPU: {}", gpu.candidate().summary());
        let gpu_name = gpu.candidate().name.clone();

        let size = window.inner_size();
        let extent = vk::Extent2D {
            width: size.width,
            height: size.height,
        };

        let renderer = Renderer::new(
            gpu,
            extent,
            shaders,
            &RendererConfig {
                vsync: config.vsync,
                frames_in_flight: config.frames_in_flight,
                initial_mesh: config.initial_mesh,
                ..RendererConfig::default()
            },
        )?;

        let pacer = FramePacer::new(config.target_fps, refresh_rate_hz(&window));
        let mut scheduler = FrameScheduler::new(renderer)
            .with_pacer(pacer)
            .with_overlay(overlay_for(config.overlay));
        scheduler.start(extent)?;

        let mut ctx = AppContext::new(window, gpu_name, scheduler.mesh_request());

        // Initialize the application
        let mut app = A::init(&mut ctx)?;
        app.on_resize(&ctx, size.width, size.height);

        Ok(AppState {
            scheduler,
            app,
            ctx,
            last_frame_time: Instant::now(),
        })
    }

    fn close(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(mut state) = self.state.take() {
            state.cleanup();
        }
        event_loop.exit();
    }
}

impl<A: LanternApp> AppState<A> {
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    fn render_frame(&mut self) -> anyhow::Result<()> {
        let now = Instant::now();
        let dt = now.duration_since(self.last_frame_time).as_secs_f32();
        self.last_frame_time = now;

        // Update the application
        self.app.update(&self.ctx, dt);
        let transform = self.app.transform();

        let result = self.scheduler.tick(&transform);
        self.ctx.stats = *self.scheduler.stats();

        match result {
            Ok(FrameOutcome::Closed) => {
                debug!("Frame loop closed");
                Ok(())
            }
            Ok(_) => Ok(()),
            Err(e) if e.severity() != Severity::Fatal => {
                warn!("Frame error: {e}");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn handle_key(&mut self, event: &KeyEvent) {
        if event.state == ElementState::Pressed && !event.repeat {
            match event.physical_key {
                PhysicalKey::Code(KeyCode::Escape) => {
                    self.scheduler.request_close();
                    return;
                }
                PhysicalKey::Code(KeyCode::KeyM) => {
                    let next = self.ctx.stats.mesh.next();
                    info!("Requesting mesh {next}");
                    self.ctx.request_mesh(next);
                    return;
                }
                _ => {}
            }
        }

        if let Some(event) = input::keyboard_event(event) {
            self.ctx.events.push(event);
        }
    }

    fn cleanup(&mut self) {
        let stats = self.ctx.stats;
        if stats.frame_count > 0 {
            info!("Frame statistics:");
            info!("  Total frames: {}", stats.frame_count);
            info!("  Skipped: {}", stats.skipped_frames);
            info!("  Swapchain rebuilds: {}", stats.swapchain_rebuilds);
            if let Some(fps) = stats.average_fps() {
                info!("  Avg (last frames): {fps:.1} fps");
            }
        }

        info!("Starting cleanup...");
        self.scheduler.request_close();
        self.scheduler.shutdown();

        // Let the app cleanup once the GPU is idle
        self.app.cleanup(&self.ctx);

        info!("Cleanup complete");
    }
}
