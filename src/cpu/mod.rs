pub mod core;
pub mod request;
pub mod tlb;
pub mod window;

#[cfg(test)]
mod unit_tests;

pub use self::core::{CoreSimulator, CoreStats, LimitRecord};
pub use request::{AccessKind, Completion, MemoryRequest, WalkStep, WALK_STEPS};
pub use tlb::TranslationCache;
pub use window::ReorderWindow;
