//! Named scene registry with a single active scene.

use std::collections::HashMap;

use tracing::{debug, info, warn};

use crate::error::{SceneError, SceneResult};
use crate::phase::RenderPhase;
use crate::scene::Scene;

/// Owns the registered scenes and forwards the frame loop to the active one.
pub struct SceneManager<R: ?Sized> {
    scenes: HashMap<String, Box<dyn Scene<R>>>,
    active: Option<String>,
}

impl<R: ?Sized> Default for SceneManager<R> {
    fn default() -> Self {
        Self {
            scenes: HashMap::new(),
            active: None,
        }
    }
}

impl<R: ?Sized> SceneManager<R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a scene under `name`. Registering does not activate it.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        scene: Box<dyn Scene<R>>,
    ) -> SceneResult<()> {
        let name = name.into();
        if self.scenes.contains_key(&name) {
            return Err(SceneError::DuplicateScene(name));
        }
        debug!("Registered scene '{}'", name);
        self.scenes.insert(name, scene);
        Ok(())
    }

    /// Makes `name` the active scene.
    ///
    /// The previous scene is finalized before the new one is initialized.
    /// An unknown name leaves the active scene untouched. If the new scene
    /// fails to initialize no scene is active afterwards.
    pub fn change(&mut self, name: &str) -> SceneResult<()> {
        if !self.scenes.contains_key(name) {
            warn!("Cannot change to unknown scene '{}'", name);
            return Err(SceneError::UnknownScene(name.to_string()));
        }

        if let Some(previous) = self.active.take()
            && let Some(scene) = self.scenes.get_mut(&previous)
        {
            debug!("Finalizing scene '{}'", previous);
            scene.finalize();
        }

        let scene = self
            .scenes
            .get_mut(name)
            .ok_or_else(|| SceneError::UnknownScene(name.to_string()))?;
        scene.init()?;

        info!("Active scene: '{}'", name);
        self.active = Some(name.to_string());
        Ok(())
    }

    /// Updates the active scene, if any.
    pub fn update(&mut self, dt: f32) {
        if let Some(scene) = self.active_scene_mut() {
            scene.update(dt);
        }
    }

    /// Renders every phase of the active scene in [`RenderPhase::ORDERED`]
    /// order.
    pub fn render(&mut self, recorder: &mut R) {
        if let Some(scene) = self.active_scene_mut() {
            for phase in RenderPhase::ORDERED {
                scene.render(phase, recorder);
            }
        }
    }

    /// Tells every registered scene about a new render-target size.
    pub fn resize(&mut self, width: u32, height: u32) {
        debug!("Resizing {} scenes to {}x{}", self.scenes.len(), width, height);
        for scene in self.scenes.values_mut() {
            scene.resize(width, height);
        }
    }

    /// Finalizes the active scene and leaves none active.
    pub fn finalize(&mut self) {
        if let Some(name) = self.active.take()
            && let Some(scene) = self.scenes.get_mut(&name)
        {
            debug!("Finalizing scene '{}'", name);
            scene.finalize();
        }
    }

    pub fn active_name(&self) -> Option<&str> {
        self.active.as_deref()
    }

    /// Clear color requested by the active scene.
    pub fn clear_color(&self) -> Option<[f32; 4]> {
        self.active
            .as_ref()
            .and_then(|name| self.scenes.get(name))
            .and_then(|scene| scene.clear_color())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.scenes.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.scenes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenes.is_empty()
    }

    fn active_scene_mut(&mut self) -> Option<&mut Box<dyn Scene<R>>> {
        let name = self.active.as_ref()?;
        self.scenes.get_mut(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    type Log = Rc<RefCell<Vec<String>>>;

    struct LoggingScene {
        name: &'static str,
        log: Log,
        fail_init: bool,
    }

    impl LoggingScene {
        fn boxed(name: &'static str, log: &Log) -> Box<dyn Scene<Vec<String>>> {
            Box::new(Self {
                name,
                log: log.clone(),
                fail_init: false,
            })
        }
    }

    impl Scene<Vec<String>> for LoggingScene {
        fn init(&mut self) -> SceneResult<()> {
            self.log.borrow_mut().push(format!("{} init", self.name));
            if self.fail_init {
                return Err(SceneError::Init {
                    name: self.name.to_string(),
                    reason: "refused".to_string(),
                });
            }
            Ok(())
        }

        fn update(&mut self, _dt: f32) {
            self.log.borrow_mut().push(format!("{} update", self.name));
        }

        fn render(&mut self, phase: RenderPhase, recorder: &mut Vec<String>) {
            recorder.push(format!("{} {}", self.name, phase.name()));
        }

        fn finalize(&mut self) {
            self.log.borrow_mut().push(format!("{} finalize", self.name));
        }

        fn resize(&mut self, width: u32, height: u32) {
            self.log
                .borrow_mut()
                .push(format!("{} resize {}x{}", self.name, width, height));
        }
    }

    #[test]
    fn test_change_finalizes_then_inits() {
        let log = Log::default();
        let mut manager = SceneManager::new();
        manager.register("title", LoggingScene::boxed("title", &log)).unwrap();
        manager.register("level", LoggingScene::boxed("level", &log)).unwrap();

        manager.change("title").unwrap();
        manager.change("level").unwrap();

        assert_eq!(
            *log.borrow(),
            vec!["title init", "title finalize", "level init"]
        );
        assert_eq!(manager.active_name(), Some("level"));
    }

    #[test]
    fn test_unknown_scene_keeps_active() {
        let log = Log::default();
        let mut manager = SceneManager::new();
        manager.register("title", LoggingScene::boxed("title", &log)).unwrap();
        manager.change("title").unwrap();

        let result = manager.change("missing");
        assert_eq!(result, Err(SceneError::UnknownScene("missing".to_string())));
        assert_eq!(manager.active_name(), Some("title"));
        assert_eq!(*log.borrow(), vec!["title init"]);
    }

    #[test]
    fn test_render_walks_phases_in_order() {
        let log = Log::default();
        let mut manager = SceneManager::new();
        manager.register("level", LoggingScene::boxed("level", &log)).unwrap();

        let mut recorder = Vec::new();
        manager.render(&mut recorder);
        assert!(recorder.is_empty(), "nothing renders without an active scene");

        manager.change("level").unwrap();
        manager.render(&mut recorder);
        assert_eq!(
            recorder,
            vec!["level background", "level opaque", "level foreground"]
        );
    }

    #[test]
    fn test_resize_reaches_inactive_scenes() {
        let log = Log::default();
        let mut manager = SceneManager::new();
        manager.register("title", LoggingScene::boxed("title", &log)).unwrap();
        manager.change("title").unwrap();
        manager.register("level", LoggingScene::boxed("level", &log)).unwrap();

        manager.resize(800, 600);

        let mut resized: Vec<_> = log
            .borrow()
            .iter()
            .filter(|entry| entry.contains("resize"))
            .cloned()
            .collect();
        resized.sort();
        assert_eq!(resized, vec!["level resize 800x600", "title resize 800x600"]);
        assert_eq!(manager.active_name(), Some("title"));
    }

    #[test]
    fn test_duplicate_registration_is_rejected() {
        let log = Log::default();
        let mut manager = SceneManager::new();
        manager.register("a", LoggingScene::boxed("a", &log)).unwrap();
        assert_eq!(
            manager.register("a", LoggingScene::boxed("a", &log)),
            Err(SceneError::DuplicateScene("a".to_string()))
        );
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_failed_init_leaves_no_active_scene() {
        let log = Log::default();
        let mut manager = SceneManager::new();
        manager.register("title", LoggingScene::boxed("title", &log)).unwrap();
        manager
            .register(
                "broken",
                Box::new(LoggingScene {
                    name: "broken",
                    log: log.clone(),
                    fail_init: true,
                }),
            )
            .unwrap();

        manager.change("title").unwrap();
        assert!(matches!(
            manager.change("broken"),
            Err(SceneError::Init { .. })
        ));
        assert_eq!(manager.active_name(), None);

        manager.update(0.016);
        assert_eq!(
            *log.borrow(),
            vec!["title init", "title finalize", "broken init"]
        );
    }
}
