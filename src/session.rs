use crate::config::AgentConfig;
use crate::memory::SessionMemory;
use crate::screen::ScreenOrigin;

/// Per-conversation mutable state: the bounded turn log and the capture
/// origin the Coordinate Mapper uses for the current cycle. Passed `&mut`
/// through the orchestration call chain, so one conversation runs one cycle
/// at a time by construction.
pub struct Session {
    pub memory: SessionMemory,
    pub origin: ScreenOrigin,
}

impl Session {
    pub fn new(cfg: &AgentConfig) -> Self {
        Self {
            memory: SessionMemory::new(cfg.memory_cap),
            origin: ScreenOrigin::default(),
        }
    }
}
