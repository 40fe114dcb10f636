pub mod cli;
pub mod render;
pub mod run;

pub use cli::*;
pub use render::*;
pub use run::*;
