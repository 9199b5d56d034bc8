use std::sync::Arc;

/// Anything driven by the global clock.
pub trait ModuleBehaviors {
    /// Advance the module by one cycle.
    fn tick_one(&mut self);

    /// Drop all in-flight state and return to the post-construction state.
    fn reset(&mut self);
}

pub trait Parameterizable {
    type ConfigType;

    fn conf(&self) -> &Self::ConfigType;

    fn init_conf(&mut self, conf: Arc<Self::ConfigType>);
}
