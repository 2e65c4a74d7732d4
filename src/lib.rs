//! Host-side controller for a fleet of embedded nodes reachable through a
//! gateway over a low-bandwidth radio mesh: status tracking, lifecycle
//! commands, messaging, and chunked OTA firmware distribution.

pub mod address;
pub mod codec;
pub mod commands;
pub mod constants;
pub mod controller;
pub mod error;
pub mod gateway;
pub mod ota;
pub mod registry;
