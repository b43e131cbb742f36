//! Bluetooth Module
//!
//! BLE plumbing for the light controller.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │              ConnectionManager               │
//! │   (one per processing task, owns session)    │
//! └──────────────────────┬───────────────────────┘
//!                        │ BleTransport / BleSession
//!              ┌─────────┴──────────┐
//!              ▼                    ▼
//!      ┌──────────────┐     ┌──────────────┐
//!      │ BtleTransport│     │   Protocol   │
//!      │  + Scanner   │     │ - Frames     │
//!      │ (btleplug)   │     │ - Payloads   │
//!      └──────────────┘     └──────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - Frame codec, command codes and color payloads
//! - [`session`] - Transport traits and the disconnect notifier
//! - [`connection`] - Per-light connect/send/disconnect with retries
//! - [`btle`] - btleplug transport
//! - [`scanner`] - Address lookup on an adapter

pub mod btle;
pub mod connection;
#[cfg(test)]
pub mod fake;
pub mod protocol;
pub mod scanner;
pub mod session;

pub use btle::BtleTransport;
pub use connection::{ConnectionConfig, ConnectionManager};
pub use session::{BleSession, BleTransport, DisconnectNotifier};
