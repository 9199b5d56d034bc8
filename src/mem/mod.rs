//! Interfaces to the memory-side collaborators of the core model, plus small reference models
//! used by the command-line driver and the tests.

pub mod cache;
pub mod dram;
pub mod page;

use crate::cpu::request::MemoryRequest;

pub use cache::{CacheLevel, SetAssocCache};
pub use dram::FixedLatencyMemory;
pub use page::{IdentityPages, PageAllocator, RandomPages};

/// Downstream side of a send.  A `false` return is back-pressure: nothing was accepted and the
/// caller retries on a later cycle.
pub trait MemoryPort {
    fn send(&mut self, request: &MemoryRequest) -> bool;
}

/// What a core sees below itself: the shared cache when one is configured, then memory.
pub struct Downstream<'a> {
    pub cache: Option<&'a mut (dyn CacheLevel + 'static)>,
    pub memory: &'a mut dyn MemoryPort,
}

impl MemoryPort for Downstream<'_> {
    fn send(&mut self, request: &MemoryRequest) -> bool {
        match &mut self.cache {
            Some(cache) => cache.send(request, &mut *self.memory),
            None => self.memory.send(request),
        }
    }
}
