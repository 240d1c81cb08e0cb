//! Game lifecycle hooks.

use crate::error::SceneResult;

/// The application-side callbacks of the frame loop.
///
/// The host calls [`on_init`](Self::on_init) once, then per frame
/// [`on_update`](Self::on_update) followed by [`on_render`](Self::on_render)
/// between opening and closing the frame, and
/// [`on_finalize`](Self::on_finalize) once before shutdown.
pub trait GameApp<R: ?Sized> {
    fn on_init(&mut self) -> SceneResult<()>;

    fn on_update(&mut self, dt: f32);

    fn on_render(&mut self, recorder: &mut R);

    fn on_finalize(&mut self);

    /// The render target changed to a new non-zero size.
    fn on_resize(&mut self, _width: u32, _height: u32) {}

    /// Clear color for the next frame; `None` keeps the current one.
    fn clear_color(&self) -> Option<[f32; 4]> {
        None
    }
}
