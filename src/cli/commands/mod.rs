//! CLI command implementations

pub mod config;
pub mod detect;
pub mod render;

pub use config::execute as config;
pub use detect::execute as detect;
pub use render::execute as render;
