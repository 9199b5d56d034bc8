pub mod base;
pub mod cpu;
pub mod mem;
pub mod processor;
pub mod sim;
pub mod timeq;
pub mod ui;
