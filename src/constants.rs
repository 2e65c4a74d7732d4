//! Normative constants (spec.md §6.4), collected in one place the way the
//! teacher keeps its device-facing magic numbers (`OTA_CHUNK_SIZE`,
//! `OTA_TIMEOUT_MS`) at module scope rather than scattered through call sites.

use std::time::Duration;

pub const CHUNK_SIZE: usize = 128;

pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(6);
pub const COMMAND_MAX_ATTEMPTS: u32 = 5;
pub const COMMAND_ATTEMPT_DELAY: Duration = Duration::from_millis(700);
pub const STATUS_TIMEOUT: Duration = Duration::from_secs(5);

pub const OTA_MAX_RETRIES_DEFAULT: u32 = 10;
pub const OTA_TIMEOUT_DEFAULT: Duration = Duration::from_millis(700);
pub const OTA_UNICAST_START_GAP: Duration = Duration::from_millis(200);

pub const POLL_QUANTUM_OTA: Duration = Duration::from_millis(1);
pub const POLL_QUANTUM_STATUS: Duration = Duration::from_millis(10);

pub const VOLTAGE_MAX_MV: u16 = 3000;
pub const VOLTAGE_WARNING_MV: u16 = 2200;
pub const VOLTAGE_DANGER_MV: u16 = 2000;

pub const NETWORK_ID_DEFAULT: u16 = 0x1200;
pub const SERIAL_BAUDRATE_DEFAULT: u32 = 1_000_000;
pub const MQTT_PORT_DEFAULT: u16 = 1883;
