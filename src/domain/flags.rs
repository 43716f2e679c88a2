//! Node state flags.
//!
//! The bit values double as the flags word of the snapshot format.

bitflags::bitflags! {
    /// Required/repeatable/attribute markers plus the own and inherited halves
    /// of relevance and enabled state.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct NodeFlags: u32 {
        const REQUIRED = 1 << 0;
        const REPEATABLE = 1 << 1;
        const ATTRIBUTE = 1 << 2;
        const RELEVANT = 1 << 3;
        const ENABLED = 1 << 4;
        const RELEVANT_INHERITED = 1 << 5;
        const ENABLED_INHERITED = 1 << 6;
    }
}

impl Default for NodeFlags {
    fn default() -> Self {
        NodeFlags::RELEVANT
            | NodeFlags::ENABLED
            | NodeFlags::RELEVANT_INHERITED
            | NodeFlags::ENABLED_INHERITED
    }
}

impl NodeFlags {
    /// Effective relevance: own AND inherited.
    pub fn is_relevant(self) -> bool {
        self.contains(NodeFlags::RELEVANT | NodeFlags::RELEVANT_INHERITED)
    }

    /// Effective enabled state: own AND inherited.
    pub fn is_enabled(self) -> bool {
        self.contains(NodeFlags::ENABLED | NodeFlags::ENABLED_INHERITED)
    }

    pub fn is_required(self) -> bool {
        self.contains(NodeFlags::REQUIRED)
    }

    pub fn is_repeatable(self) -> bool {
        self.contains(NodeFlags::REPEATABLE)
    }

    pub fn is_attribute(self) -> bool {
        self.contains(NodeFlags::ATTRIBUTE)
    }
}
