//! Scene layer on top of the frame loop.
//!
//! This crate provides:
//! - Ordered render phases
//! - The [`Scene`] trait and a named [`SceneManager`]
//! - The [`GameApp`] lifecycle driven once per frame
//!
//! Everything is generic over the recorder type `R` the frame loop hands
//! out, so scenes never see the GPU backend directly.

mod error;

pub mod game;
pub mod manager;
pub mod phase;
pub mod scene;

pub use error::{SceneError, SceneResult};
pub use game::GameApp;
pub use manager::SceneManager;
pub use phase::RenderPhase;
pub use scene::Scene;
