//! The scene trait.

use crate::error::SceneResult;
use crate::phase::RenderPhase;

/// One screen of content: a title screen, a level, a menu.
///
/// `R` is the command recorder of the open frame.
pub trait Scene<R: ?Sized> {
    /// Called when the scene becomes active.
    fn init(&mut self) -> SceneResult<()> {
        Ok(())
    }

    /// Advances the scene by `dt` seconds.
    fn update(&mut self, dt: f32);

    /// Records the commands of one phase.
    fn render(&mut self, phase: RenderPhase, recorder: &mut R);

    /// Called when the scene stops being active.
    fn finalize(&mut self) {}

    /// The render target changed to `width` x `height` pixels. Delivered to
    /// every registered scene, active or not.
    fn resize(&mut self, _width: u32, _height: u32) {}

    /// Back-buffer clear color wanted by the scene, if any.
    fn clear_color(&self) -> Option<[f32; 4]> {
        None
    }
}
