use crate::timeq::Cycle;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum AccessKind {
    #[default]
    Read,
    Write,
}

impl AccessKind {
    pub fn is_read(self) -> bool {
        matches!(self, Self::Read)
    }

    pub fn is_write(self) -> bool {
        matches!(self, Self::Write)
    }
}

/// Number of dependent synthetic reads issued for one translation miss.
pub const WALK_STEPS: u8 = 4;

/// Page-walk bookkeeping carried by a synthetic walk read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalkStep {
    /// 1..=WALK_STEPS
    pub step: u8,
    pub original_addr: u64,
    pub original_kind: AccessKind,
}

impl WalkStep {
    pub fn is_last(&self) -> bool {
        self.step == WALK_STEPS
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryRequest {
    pub addr: u64,
    pub kind: AccessKind,
    pub core_id: usize,
    /// `None` for architectural accesses.
    pub walk: Option<WalkStep>,
}

impl MemoryRequest {
    pub fn new(addr: u64, kind: AccessKind, core_id: usize) -> Self {
        Self {
            addr,
            kind,
            core_id,
            walk: None,
        }
    }

    /// Synthetic walk read at `addr` on behalf of the access described by `original`.
    /// Walk reads are always reads, whatever the original access kind.
    pub fn walk_step(addr: u64, core_id: usize, step: u8, original: &MemoryRequest) -> Self {
        debug_assert!((1..=WALK_STEPS).contains(&step));
        Self {
            addr,
            kind: AccessKind::Read,
            core_id,
            walk: Some(WalkStep {
                step,
                original_addr: original.addr,
                original_kind: original.kind,
            }),
        }
    }

    pub fn is_walk(&self) -> bool {
        self.walk.is_some()
    }
}

/// Completion event handed back by the memory system once a request has been serviced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub request: MemoryRequest,
    /// Cycle the request was accepted downstream.
    pub arrive: Cycle,
    /// Cycle the data was returned.
    pub depart: Cycle,
}

impl Completion {
    pub fn new(request: MemoryRequest, arrive: Cycle, depart: Cycle) -> Self {
        Self {
            request,
            arrive,
            depart,
        }
    }
}
