//! Controller for BLE RGB lights.
//!
//! - [`domain`] - light state, model table, color math, settings, errors
//! - [`infrastructure`] - frame codec, BLE transport and connections, logging
//! - [`controller`] - admission-controlled update scheduling
//! - [`bridge`] - message-bus topics and JSON payloads

pub mod bridge;
pub mod controller;
pub mod domain;
pub mod infrastructure;
