//! Prompt System - template loading and rendering
//!
//! Prompt templates live in a YAML library and are rendered with
//! Handlebars.

mod library;
mod render;

pub use library::{ONE_SIDED_RESPONSE, PromptLibrary};
pub use render::PromptRenderer;
