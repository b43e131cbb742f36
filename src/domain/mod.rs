//! Domain layer: light state, model table, color math, settings and errors.
//! Nothing in here performs I/O except settings persistence.

pub mod color;
pub mod error;
pub mod light;
pub mod models;
pub mod registry;
pub mod settings;
