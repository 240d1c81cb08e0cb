//! Demo game: two scenes that take turns on a timer.

use cadence_rhi::{CommandRecorder, ScissorRect, Viewport};
use cadence_scene::{GameApp, RenderPhase, Scene, SceneManager, SceneResult};
use tracing::{debug, info, warn};

const PULSE: &str = "pulse";
const LETTERBOX: &str = "letterbox";

/// Seconds each scene stays active.
const SCENE_SECONDS: f32 = 3.0;

/// Fades the clear color through a slow color cycle.
#[derive(Default)]
struct PulseScene {
    time: f32,
}

impl<R: CommandRecorder + ?Sized> Scene<R> for PulseScene {
    fn init(&mut self) -> SceneResult<()> {
        self.time = 0.0;
        Ok(())
    }

    fn update(&mut self, dt: f32) {
        self.time += dt;
    }

    fn render(&mut self, _phase: RenderPhase, _recorder: &mut R) {}

    fn clear_color(&self) -> Option<[f32; 4]> {
        let t = self.time;
        Some([
            0.5 + 0.5 * t.sin(),
            0.5 + 0.5 * (t * 0.7).sin(),
            0.5 + 0.5 * (t * 1.3).sin(),
            1.0,
        ])
    }
}

/// Restricts the opaque phase to a 2.39:1 band in the middle of the target.
struct LetterboxScene {
    width: u32,
    height: u32,
}

impl LetterboxScene {
    fn band(&self) -> (Viewport, ScissorRect) {
        let band_height = ((self.width as f32 / 2.39) as u32).min(self.height);
        let top = (self.height - band_height) / 2;
        let viewport = Viewport {
            y: top as f32,
            height: band_height as f32,
            ..Viewport::full(self.width, self.height)
        };
        let scissor = ScissorRect {
            x: 0,
            y: top as i32,
            width: self.width,
            height: band_height,
        };
        (viewport, scissor)
    }
}

impl<R: CommandRecorder + ?Sized> Scene<R> for LetterboxScene {
    fn update(&mut self, _dt: f32) {}

    fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
    }

    fn render(&mut self, phase: RenderPhase, recorder: &mut R) {
        match phase {
            RenderPhase::Opaque => {
                let (viewport, scissor) = self.band();
                recorder.set_viewport(&viewport);
                recorder.set_scissor(&scissor);
            }
            RenderPhase::Foreground => {
                recorder.set_viewport(&Viewport::full(self.width, self.height));
                recorder.set_scissor(&ScissorRect::full(self.width, self.height));
            }
            RenderPhase::Background => {}
        }
    }

    fn clear_color(&self) -> Option<[f32; 4]> {
        Some([0.0, 0.0, 0.0, 1.0])
    }
}

/// Alternates between the demo scenes every few seconds.
pub struct DemoGame<R: CommandRecorder + ?Sized> {
    scenes: SceneManager<R>,
    width: u32,
    height: u32,
    scene_time: f32,
}

impl<R: CommandRecorder + ?Sized> DemoGame<R> {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            scenes: SceneManager::new(),
            width,
            height,
            scene_time: 0.0,
        }
    }

    pub fn active_scene(&self) -> Option<&str> {
        self.scenes.active_name()
    }

    fn next_scene(&self) -> &'static str {
        match self.scenes.active_name() {
            Some(PULSE) => LETTERBOX,
            _ => PULSE,
        }
    }
}

impl<R: CommandRecorder + ?Sized> GameApp<R> for DemoGame<R> {
    fn on_init(&mut self) -> SceneResult<()> {
        self.scenes
            .register(PULSE, Box::new(PulseScene::default()))?;
        self.scenes.register(
            LETTERBOX,
            Box::new(LetterboxScene {
                width: self.width,
                height: self.height,
            }),
        )?;
        self.scenes.change(PULSE)?;
        info!("Demo game initialized with {} scenes", self.scenes.len());
        Ok(())
    }

    fn on_update(&mut self, dt: f32) {
        self.scene_time += dt;
        if self.scene_time >= SCENE_SECONDS {
            self.scene_time = 0.0;
            let next = self.next_scene();
            debug!("Switching to scene '{}'", next);
            if let Err(e) = self.scenes.change(next) {
                warn!("Scene change failed: {}", e);
            }
        }
        self.scenes.update(dt);
    }

    fn on_render(&mut self, recorder: &mut R) {
        self.scenes.render(recorder);
    }

    fn on_finalize(&mut self) {
        self.scenes.finalize();
        info!("Demo game finalized");
    }

    fn on_resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        self.scenes.resize(width, height);
    }

    fn clear_color(&self) -> Option<[f32; 4]> {
        self.scenes.clear_color()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_rhi::headless::{HeadlessCommandBuffer, RecordedCommand};

    fn recording_buffer() -> HeadlessCommandBuffer {
        use cadence_rhi::GpuDevice;
        use cadence_rhi::headless::HeadlessGpu;

        let gpu = HeadlessGpu::new();
        let allocator = gpu.create_command_allocator().unwrap();
        let mut buffer = gpu.create_command_buffer(&allocator).unwrap();
        gpu.reopen_command_buffer(&mut buffer, &allocator).unwrap();
        buffer
    }

    #[test]
    fn test_scenes_alternate() {
        let mut game = DemoGame::<HeadlessCommandBuffer>::new(640, 480);
        game.on_init().unwrap();
        assert_eq!(game.active_scene(), Some(PULSE));

        game.on_update(SCENE_SECONDS);
        assert_eq!(game.active_scene(), Some(LETTERBOX));
        assert_eq!(game.clear_color(), Some([0.0, 0.0, 0.0, 1.0]));

        game.on_update(SCENE_SECONDS);
        assert_eq!(game.active_scene(), Some(PULSE));

        game.on_finalize();
        assert_eq!(game.active_scene(), None);
    }

    #[test]
    fn test_letterbox_follows_resize() {
        let mut game = DemoGame::<HeadlessCommandBuffer>::new(640, 480);
        game.on_init().unwrap();
        game.on_update(SCENE_SECONDS);
        assert_eq!(game.active_scene(), Some(LETTERBOX));

        game.on_resize(1000, 1000);
        let mut buffer = recording_buffer();
        game.on_render(&mut buffer);

        let expected = LetterboxScene {
            width: 1000,
            height: 1000,
        }
        .band();
        let scissors: Vec<_> = buffer
            .commands()
            .iter()
            .filter_map(|c| match c {
                RecordedCommand::SetScissor(s) => Some(*s),
                _ => None,
            })
            .collect();
        assert_eq!(scissors, vec![expected.1, ScissorRect::full(1000, 1000)]);
    }

    #[test]
    fn test_letterbox_band_is_centered() {
        let scene = LetterboxScene {
            width: 1000,
            height: 1000,
        };
        let (viewport, scissor) = scene.band();
        assert_eq!(scissor.height, 418);
        assert_eq!(scissor.y, 291);
        assert_eq!(viewport.height, 418.0);
        assert_eq!(viewport.width, 1000.0);
    }
}
