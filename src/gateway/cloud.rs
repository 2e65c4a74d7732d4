//! Cloud (broker-attached) gateway adapter.
//!
//! Ported in spirit from the teacher's `transport::ble::BleTransport`: a
//! background thread drives a network client to completion and forwards
//! decoded events, rather than blocking the caller's thread on I/O. Here the
//! client is an MQTT broker connection instead of a BLE peripheral, using
//! `rumqttc`'s synchronous `Client`/`Connection` pair (an event-loop
//! iterator), which keeps the adapter free of an async runtime — consistent
//! with the rest of this controller being synchronous and callback-driven.
//!
//! Topic layout (this controller's convention; spec.md leaves the broker
//! wire format unspecified):
//! - Upstream (node -> controller): `{network_id:04X}/+/up`
//! - Downstream, unicast: `{network_id:04X}/{addr:016X}/down`
//! - Downstream, broadcast: `{network_id:04X}/broadcast/down`

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use log::warn;
use rumqttc::{Client, Event, Incoming, MqttOptions, QoS};

use crate::address::NodeAddress;
use crate::codec::{self, Payload};
use crate::error::ControllerError;

use super::{FrameCallback, GatewayAdapter};

const KEEP_ALIVE: Duration = Duration::from_secs(5);
const CLIENT_ID: &str = "swarmit-ctl";

pub struct CloudAdapter {
    host: String,
    port: u16,
    use_tls: bool,
    network_id: u16,
    verbose: bool,
    client: Option<Client>,
    running: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
}

impl CloudAdapter {
    pub fn new(host: impl Into<String>, port: u16, use_tls: bool, network_id: u16, verbose: bool) -> Self {
        Self {
            host: host.into(),
            port,
            use_tls,
            network_id,
            verbose,
            client: None,
            running: Arc::new(AtomicBool::new(false)),
            reader: None,
        }
    }

    fn upstream_topic(&self) -> String {
        format!("{:04X}/+/up", self.network_id)
    }

    fn downstream_topic(&self, destination: NodeAddress) -> String {
        if destination.is_broadcast() {
            format!("{:04X}/broadcast/down", self.network_id)
        } else {
            format!("{:04X}/{destination}/down", self.network_id)
        }
    }
}

impl GatewayAdapter for CloudAdapter {
    fn init(&mut self, on_frame: FrameCallback) -> Result<(), ControllerError> {
        let mut options = MqttOptions::new(CLIENT_ID, &self.host, self.port);
        options.set_keep_alive(KEEP_ALIVE);
        if self.use_tls {
            // Broker-specific TLS material is out of scope here (spec.md §1:
            // the broker transport is an external collaborator); callers
            // needing TLS configure it on a broker proxy in front of this
            // adapter, or extend `MqttOptions` before passing it in.
            warn!("mqtt_use_tls requested but no client certificate configured; connecting without TLS");
        }

        let (client, mut connection) = Client::new(options, 64);
        client
            .subscribe(self.upstream_topic(), QoS::AtLeastOnce)
            .map_err(|e| ControllerError::TransportUnavailable(format!("subscribing to {}: {e}", self.upstream_topic())))?;

        self.running.store(true, Ordering::SeqCst);
        let running = self.running.clone();
        let verbose = self.verbose;
        self.reader = Some(std::thread::spawn(move || {
            for notification in connection.iter() {
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                match notification {
                    Ok(Event::Incoming(Incoming::Publish(publish))) => {
                        let Some(addr) = addr_from_topic(&publish.topic) else {
                            if verbose {
                                warn!("dropping publish on unrecognised topic {:?}", publish.topic);
                            }
                            continue;
                        };
                        match codec::decode(&publish.payload) {
                            Ok(payload) => on_frame(addr, payload),
                            Err(err) => {
                                if verbose {
                                    warn!("dropping malformed payload from {addr}: {err}");
                                }
                            }
                        }
                    }
                    Ok(_) => {}
                    Err(err) => {
                        warn!("mqtt connection error, stopping reader: {err}");
                        break;
                    }
                }
            }
        }));

        self.client = Some(client);
        Ok(())
    }

    fn send(&self, destination: NodeAddress, payload: &Payload) -> Result<(), ControllerError> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| ControllerError::TransportUnavailable("adapter not initialized".into()))?;
        let bytes = codec::encode(payload)
            .map_err(|e| ControllerError::TransportUnavailable(format!("encoding payload: {e}")))?;
        client
            .publish(self.downstream_topic(destination), QoS::AtLeastOnce, false, bytes)
            .map_err(|e| ControllerError::TransportUnavailable(format!("publishing to broker: {e}")))?;
        Ok(())
    }

    fn close(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(client) = self.client.take() {
            let _ = client.disconnect();
        }
        if let Some(handle) = self.reader.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for CloudAdapter {
    fn drop(&mut self) {
        self.close();
    }
}

/// Parse `{network_id}/{addr}/up` back into a [`NodeAddress`].
fn addr_from_topic(topic: &str) -> Option<NodeAddress> {
    let mut parts = topic.split('/');
    let _network_id = parts.next()?;
    let addr_part = parts.next()?;
    if parts.next()? != "up" {
        return None;
    }
    NodeAddress::parse_hex(addr_part).ok()
}
