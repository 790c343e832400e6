//! setforge - themed trading-card set generator
//!
//! Core library: card model, language-model and image backends, the
//! generation pipeline and the external renderer bridge.

pub mod config;
pub mod core;


pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
