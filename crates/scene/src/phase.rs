//! Render phases.

/// A pass over the active scene within one frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RenderPhase {
    /// Full-screen backdrops and sprites behind the world
    Background,
    /// World geometry
    Opaque,
    /// Overlays and sprites in front of the world
    Foreground,
}

impl RenderPhase {
    /// Every phase, in the order it is rendered.
    pub const ORDERED: [RenderPhase; 3] = [Self::Background, Self::Opaque, Self::Foreground];

    pub fn name(self) -> &'static str {
        match self {
            Self::Background => "background",
            Self::Opaque => "opaque",
            Self::Foreground => "foreground",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordered_matches_declaration_order() {
        let mut sorted = RenderPhase::ORDERED;
        sorted.sort();
        assert_eq!(sorted, RenderPhase::ORDERED);
        assert_eq!(RenderPhase::ORDERED[0], RenderPhase::Background);
        assert_eq!(RenderPhase::ORDERED[2], RenderPhase::Foreground);
    }
}
