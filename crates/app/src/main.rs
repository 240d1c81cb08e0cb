//! Cadence - frame-submission demo entry point.
//!
//! Opens a window and drives the demo game through the Vulkan frame core,
//! or runs a fixed number of frames on the headless backend with
//! `--headless`.

mod cli;
mod demo;
mod runner;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::WindowId;

use cadence_core::{EngineConfig, FrameTimer};
use cadence_frame::{FrameConfig, FrameOrchestrator, FrameRecorder, VulkanBootstrap};
use cadence_platform::Window;
use cadence_rhi::device::VulkanGpu;
use cadence_scene::GameApp;

use crate::cli::Cli;
use crate::demo::DemoGame;

struct App {
    config: EngineConfig,
    // Drop order: frame core, then device and surface, then the window.
    frames: Option<FrameOrchestrator<VulkanGpu>>,
    bootstrap: Option<VulkanBootstrap>,
    window: Option<Window>,
    game: DemoGame<FrameRecorder<VulkanGpu>>,
    timer: FrameTimer,
    fatal: Option<anyhow::Error>,
}

impl App {
    fn new(config: EngineConfig) -> Self {
        let game = DemoGame::new(config.width, config.height);
        Self {
            config,
            frames: None,
            bootstrap: None,
            window: None,
            game,
            timer: FrameTimer::new(),
            fatal: None,
        }
    }

    fn init_graphics(&mut self, window: &Window) -> Result<()> {
        let bootstrap = VulkanBootstrap::new(window, &self.config)?;

        // The platform may not have honored the requested size.
        let frame_config = FrameConfig {
            width: window.width(),
            height: window.height(),
            ..FrameConfig::from(&self.config)
        };
        let frames = FrameOrchestrator::new(
            bootstrap.gpu().clone(),
            &bootstrap.surface_target(),
            &frame_config,
        )?;

        self.game.on_init().context("Failed to initialize game")?;

        self.frames = Some(frames);
        self.bootstrap = Some(bootstrap);
        Ok(())
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        error!("Fatal error: {:#}", err);
        self.fatal.get_or_insert(err);
        event_loop.exit();
    }

    fn shutdown(&mut self) {
        if let Some(mut frames) = self.frames.take() {
            self.game.on_finalize();
            if let Err(e) = frames.shutdown() {
                error!("Frame core shutdown failed: {}", e);
            }
        }
        self.bootstrap = None;
        self.window = None;
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        let window = match Window::new(
            event_loop,
            self.config.width,
            self.config.height,
            &self.config.title,
        ) {
            Ok(window) => window,
            Err(e) => return self.fail(event_loop, e.into()),
        };

        match self.init_graphics(&window) {
            Ok(()) => {
                info!("Initialization complete, entering main loop");
                self.window = Some(window);
            }
            Err(e) => self.fail(event_loop, e.context("Failed to initialize graphics")),
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested, shutting down");
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if let Some(window) = self.window.as_mut() {
                    window.resize(size.width, size.height);
                }
                if size.width > 0 && size.height > 0 {
                    self.game.on_resize(size.width, size.height);
                }
                if let Some(frames) = self.frames.as_mut()
                    && let Err(e) = frames.resize(size.width, size.height)
                {
                    if e.is_fatal() {
                        self.fail(event_loop, e.into());
                    } else {
                        warn!("Resize failed, retrying next frame: {}", e);
                    }
                }
            }
            WindowEvent::RedrawRequested => {
                let dt = self.timer.tick_secs();
                if let Some(frames) = self.frames.as_mut()
                    && let Err(e) = runner::step_frame(frames, &mut self.game, dt)
                {
                    self.fail(event_loop, e.into());
                }
            }
            WindowEvent::KeyboardInput { event, .. } => {
                let escape = event.physical_key == PhysicalKey::Code(KeyCode::Escape);
                if escape && event.state.is_pressed() {
                    info!("Escape pressed, shutting down");
                    event_loop.exit();
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = self.window.as_ref()
            && !window.is_minimized()
        {
            window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        info!(
            "Exiting after {} frames ({:.1} fps average)",
            self.timer.frame_count(),
            self.timer.average_fps()
        );
        self.shutdown();
    }
}

fn main() -> Result<()> {
    cadence_core::init_logging();

    let cli = Cli::parse();
    let config = cli
        .resolve(EngineConfig::from_env()?)
        .context("Invalid configuration")?;
    info!(
        "Starting cadence ({}x{}, {} frame slots, {} images)",
        config.width, config.height, config.frame_slots, config.image_count
    );

    if cli.headless {
        let mut game = DemoGame::new(config.width, config.height);
        runner::run_headless(&config, cli.gpu_latency, cli.frames, &mut game)?;
        return Ok(());
    }

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    match app.fatal.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
