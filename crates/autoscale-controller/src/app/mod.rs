//! Application wiring: building the shared services and running the
//! controllers next to the metrics server until shutdown.

pub mod builder;
pub mod core;
pub mod tasks;

pub use builder::ApplicationBuilder;
pub use core::Application;
