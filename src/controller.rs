//! Controller Facade (component C6).
//!
//! Wires a [`GatewayAdapter`] into the [`NodeRegistry`] and the command/OTA
//! engines, and exposes the public operations a front end drives. Grounded in
//! `testbed/swarmit/controller.py::Controller`: its constructor wiring,
//! `on_frame_received` dispatch, and `known_devices` first-access wait are
//! carried over; the OTA/command engines themselves live in sibling modules
//! rather than as methods on this type.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread::sleep;
use std::time::Duration;

use crate::address::NodeAddress;
use crate::codec::Payload;
use crate::commands::{self, ResetLocation};
use crate::constants::{COMMAND_TIMEOUT, MQTT_PORT_DEFAULT, NETWORK_ID_DEFAULT, OTA_MAX_RETRIES_DEFAULT, OTA_TIMEOUT_DEFAULT, SERIAL_BAUDRATE_DEFAULT};
use crate::error::ControllerError;
use crate::gateway::{cloud::CloudAdapter, edge::EdgeAdapter, FrameCallback, GatewayAdapter};
use crate::ota::{self, StartOtaResult, TransferStatus};
use crate::registry::{NodeRegistry, NodeStatus};

/// Which gateway transport to use (spec.md §6.2 `adapter`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterKind {
    Edge,
    Cloud,
}

/// Construction-time configuration (spec.md §6.2).
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub serial_port: String,
    pub serial_baudrate: u32,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_use_tls: bool,
    pub network_id: u16,
    pub adapter: AdapterKind,
    pub devices: Vec<NodeAddress>,
    pub ota_max_retries: u32,
    pub ota_timeout: Duration,
    pub verbose: bool,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            serial_port: String::new(),
            serial_baudrate: SERIAL_BAUDRATE_DEFAULT,
            mqtt_host: "localhost".to_string(),
            mqtt_port: MQTT_PORT_DEFAULT,
            mqtt_use_tls: false,
            network_id: NETWORK_ID_DEFAULT,
            adapter: AdapterKind::Edge,
            devices: Vec::new(),
            ota_max_retries: OTA_MAX_RETRIES_DEFAULT,
            ota_timeout: OTA_TIMEOUT_DEFAULT,
            verbose: false,
        }
    }
}

/// Host-side fleet controller. Open on construction, closed after
/// [`Controller::terminate`]; every other operation requires Open.
pub struct Controller {
    settings: ControllerSettings,
    adapter: Box<dyn GatewayAdapter>,
    registry: Arc<NodeRegistry>,
    start_ota_state: Arc<Mutex<Option<Arc<ota::StartOtaState>>>>,
    transfer_state: Arc<Mutex<Option<Arc<ota::TransferState>>>>,
    known_devices_waited: Mutex<bool>,
    open: Mutex<bool>,
}

impl Controller {
    pub fn new(settings: ControllerSettings) -> Result<Self, ControllerError> {
        let registry = Arc::new(NodeRegistry::new());
        let start_ota_state: Arc<Mutex<Option<Arc<ota::StartOtaState>>>> = Arc::new(Mutex::new(None));
        let transfer_state: Arc<Mutex<Option<Arc<ota::TransferState>>>> = Arc::new(Mutex::new(None));

        let mut adapter: Box<dyn GatewayAdapter> = match settings.adapter {
            AdapterKind::Edge => {
                Box::new(EdgeAdapter::new(settings.serial_port.clone(), settings.serial_baudrate, settings.verbose))
            }
            AdapterKind::Cloud => Box::new(CloudAdapter::new(
                settings.mqtt_host.clone(),
                settings.mqtt_port,
                settings.mqtt_use_tls,
                settings.network_id,
                settings.verbose,
            )),
        };

        let callback = build_callback(
            registry.clone(),
            start_ota_state.clone(),
            transfer_state.clone(),
            settings.devices.clone(),
            settings.verbose,
        );
        adapter.init(callback)?;

        Ok(Self {
            settings,
            adapter,
            registry,
            start_ota_state,
            transfer_state,
            known_devices_waited: Mutex::new(false),
            open: Mutex::new(true),
        })
    }

    fn ensure_open(&self) -> Result<(), ControllerError> {
        if *self.open.lock().unwrap() {
            Ok(())
        } else {
            Err(ControllerError::TransportUnavailable("controller is closed".into()))
        }
    }

    /// The fleet's current status view. The first call after construction
    /// blocks for `COMMAND_TIMEOUT` to let autonomous status broadcasts
    /// accumulate; every later call returns the live snapshot immediately.
    pub fn known_devices(&self) -> HashMap<NodeAddress, NodeStatus> {
        let mut waited = self.known_devices_waited.lock().unwrap();
        if !*waited {
            sleep(COMMAND_TIMEOUT);
            *waited = true;
        }
        self.registry.snapshot(&[])
    }

    pub fn status(&self) -> Result<HashMap<NodeAddress, NodeStatus>, ControllerError> {
        self.ensure_open()?;
        Ok(self.known_devices())
    }

    pub fn start(&self) -> Result<(), ControllerError> {
        self.ensure_open()?;
        self.known_devices();
        commands::start(&self.registry, self.adapter.as_ref(), &self.settings.devices)
    }

    pub fn stop(&self) -> Result<(), ControllerError> {
        self.ensure_open()?;
        self.known_devices();
        commands::stop(&self.registry, self.adapter.as_ref(), &self.settings.devices)
    }

    pub fn reset(&self, locations: &HashMap<NodeAddress, ResetLocation>) -> Result<(), ControllerError> {
        self.ensure_open()?;
        self.known_devices();
        commands::reset(&self.registry, self.adapter.as_ref(), &self.settings.devices, locations)
    }

    pub fn message(&self, text: &str) -> Result<(), ControllerError> {
        self.ensure_open()?;
        self.known_devices();
        commands::message(&self.registry, self.adapter.as_ref(), &self.settings.devices, text)
    }

    /// Prepare `firmware` into chunks and run the Start-OTA handshake
    /// against every ready selected device.
    ///
    /// Returns `Err(StartOtaIncomplete)` if any targeted device did not ack
    /// within the retry budget (spec.md §4.5.2/§7); the caller is expected to
    /// issue [`Controller::stop`] before retrying.
    pub fn start_ota(&self, firmware: &[u8]) -> Result<StartOtaResult, ControllerError> {
        self.ensure_open()?;
        self.known_devices();

        let prepared = ota::prepare(firmware);
        let devices_to_flash = self.registry.ready_devices(&self.settings.devices);
        let state = Arc::new(ota::StartOtaState::new());
        *self.start_ota_state.lock().unwrap() = Some(state.clone());

        let result = ota::start_ota(
            self.adapter.as_ref(),
            &state,
            &self.settings.devices,
            &devices_to_flash,
            firmware.len() as u32,
            prepared.chunk_count(),
            prepared.image_digest,
            self.settings.ota_max_retries,
            self.settings.ota_timeout,
        )?;

        if !result.missed.is_empty() {
            return Err(ControllerError::StartOtaIncomplete { missed: result.missed });
        }
        Ok(result)
    }

    /// Stream `firmware` to `acked_addrs` (normally the `acked` list
    /// returned by [`Controller::start_ota`]).
    ///
    /// Returns `Err(TransferIncomplete)` if any device's per-chunk map is not
    /// fully acked after the chunk loop (spec.md §4.5.4/§7).
    pub fn transfer(
        &self,
        firmware: &[u8],
        acked_addrs: &[NodeAddress],
    ) -> Result<HashMap<NodeAddress, TransferStatus>, ControllerError> {
        self.ensure_open()?;

        let prepared = ota::prepare(firmware);
        let state = Arc::new(ota::TransferState::new(acked_addrs, prepared.chunks.len()));
        *self.transfer_state.lock().unwrap() = Some(state.clone());

        let statuses = ota::transfer(
            self.adapter.as_ref(),
            &state,
            &self.settings.devices,
            acked_addrs,
            &prepared.chunks,
            self.settings.ota_max_retries,
            self.settings.ota_timeout,
        )?;
        *self.transfer_state.lock().unwrap() = None;

        let failed: Vec<NodeAddress> = statuses.iter().filter(|(_, s)| !s.success).map(|(addr, _)| *addr).collect();
        if !failed.is_empty() {
            return Err(ControllerError::TransferIncomplete { failed, total: statuses.len() });
        }
        Ok(statuses)
    }

    /// Block, surfacing inbound `EVENT_GPIO`/`EVENT_LOG` notifications via
    /// the logging facade, until externally interrupted.
    pub fn monitor(&self) -> Result<(), ControllerError> {
        self.ensure_open()?;
        log::info!("monitoring fleet");
        loop {
            sleep(Duration::from_millis(10));
        }
    }

    pub fn terminate(&mut self) {
        self.adapter.close();
        *self.open.lock().unwrap() = false;
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        if *self.open.lock().unwrap() {
            self.adapter.close();
        }
    }
}

fn build_callback(
    registry: Arc<NodeRegistry>,
    start_ota_state: Arc<Mutex<Option<Arc<ota::StartOtaState>>>>,
    transfer_state: Arc<Mutex<Option<Arc<ota::TransferState>>>>,
    event_selection: Vec<NodeAddress>,
    verbose: bool,
) -> FrameCallback {
    Arc::new(move |addr: NodeAddress, payload: Payload| match payload {
        Payload::StatusNotif { device, status, battery, pos_x, pos_y } => {
            registry.update(addr, NodeStatus { device_type: device, lifecycle: status, battery_mv: battery, pos_x, pos_y });
        }
        Payload::OtaStartAck => {
            if let Some(state) = start_ota_state.lock().unwrap().as_ref() {
                state.ack(addr);
            }
        }
        Payload::OtaChunkAck { index } => match transfer_state.lock().unwrap().as_ref() {
            Some(state) => {
                if !state.ack(addr, index) && verbose {
                    log::warn!("chunk ack index {index} from {addr} out of range or unknown device");
                }
            }
            None if verbose => log::warn!("chunk ack from {addr} received with no transfer in progress"),
            None => {}
        },
        Payload::EventGpio { timestamp, data } => {
            if event_selection.is_empty() || event_selection.contains(&addr) {
                log::info!("GPIO event from {addr} at t={timestamp}: {} byte(s)", data.len());
            }
        }
        Payload::EventLog { timestamp, data } => {
            if event_selection.is_empty() || event_selection.contains(&addr) {
                log::info!("LOG event from {addr} at t={timestamp}: {}", String::from_utf8_lossy(&data));
            }
        }
        other => {
            if verbose {
                log::warn!("dropping unexpected inbound payload from {addr}: {other:?}");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{DeviceType, Lifecycle};

    fn running_status() -> NodeStatus {
        NodeStatus { device_type: DeviceType::DotBotV3, lifecycle: Lifecycle::Running, battery_mv: 3000, pos_x: 0, pos_y: 0 }
    }

    #[test]
    fn build_callback_updates_registry_on_status_notif() {
        let registry = Arc::new(NodeRegistry::new());
        let start_state = Arc::new(Mutex::new(None));
        let transfer_state = Arc::new(Mutex::new(None));
        let callback = build_callback(registry.clone(), start_state, transfer_state, vec![], false);

        let addr = NodeAddress(1);
        callback(
            addr,
            Payload::StatusNotif { device: DeviceType::DotBotV3, status: Lifecycle::Running, battery: 3000, pos_x: 0, pos_y: 0 },
        );

        assert_eq!(registry.get(addr), Some(running_status()));
    }

    #[test]
    fn build_callback_acks_start_ota_state_when_present() {
        let registry = Arc::new(NodeRegistry::new());
        let state = Arc::new(ota::StartOtaState::new());
        let start_state = Arc::new(Mutex::new(Some(state.clone())));
        let transfer_state = Arc::new(Mutex::new(None));
        let callback = build_callback(registry, start_state, transfer_state, vec![], false);

        let addr = NodeAddress(7);
        callback(addr, Payload::OtaStartAck);

        assert!(state.acked_addrs().contains(&addr));
    }

    #[test]
    fn build_callback_acks_transfer_state_when_present() {
        let registry = Arc::new(NodeRegistry::new());
        let addr = NodeAddress(7);
        let transfer = Arc::new(ota::TransferState::new(&[addr], 2));
        let start_state = Arc::new(Mutex::new(None));
        let transfer_state = Arc::new(Mutex::new(Some(transfer.clone())));
        let callback = build_callback(registry, start_state, transfer_state, vec![], false);

        callback(addr, Payload::OtaChunkAck { index: 0 });

        let statuses = transfer.finalize();
        assert!(statuses[&addr].chunks[0].acked);
    }
}
