pub mod card;
pub mod generation;
pub mod image;
pub mod llm;
pub mod logging;
pub mod render;
