//! Command Engine (component C4).
//!
//! Start/Stop/Reset/Message requests share the send-until-observed retry
//! shape from `testbed/swarmit/controller.py`'s `start`/`stop`/`reset`/
//! `send_message` methods, generalized here into free functions operating on
//! a [`NodeRegistry`] and a [`GatewayAdapter`] rather than a monolithic
//! controller object.

use std::collections::HashMap;
use std::thread::sleep;

use crate::address::NodeAddress;
use crate::codec::{Lifecycle, Payload};
use crate::constants::{COMMAND_ATTEMPT_DELAY, COMMAND_MAX_ATTEMPTS};
use crate::error::ControllerError;
use crate::gateway::GatewayAdapter;
use crate::registry::NodeRegistry;

/// Target position for a `reset` (spec.md §3/§6.3, micrometres).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResetLocation {
    pub pos_x: i32,
    pub pos_y: i32,
}

fn send(adapter: &dyn GatewayAdapter, destination: NodeAddress, payload: &Payload) -> Result<(), ControllerError> {
    adapter.send(destination, payload)
}

/// Start every *ready* device in `selection` (empty selection means all
/// ready devices), retrying until each is observed `Running` or the attempt
/// budget is exhausted.
pub fn start(
    registry: &NodeRegistry,
    adapter: &dyn GatewayAdapter,
    selection: &[NodeAddress],
) -> Result<(), ControllerError> {
    let targets = registry.ready_devices(selection);
    let is_done = |registry: &NodeRegistry| {
        targets
            .iter()
            .all(|addr| registry.get(*addr).map(|s| s.lifecycle == Lifecycle::Running).unwrap_or(false))
    };

    let mut attempts = 0;
    while attempts < COMMAND_MAX_ATTEMPTS && !is_done(registry) {
        if selection.is_empty() {
            send(adapter, NodeAddress::BROADCAST, &Payload::StartRequest)?;
        } else {
            for addr in &targets {
                let terminal = registry.get(*addr).map(|s| s.lifecycle == Lifecycle::Running).unwrap_or(false);
                if terminal {
                    continue;
                }
                send(adapter, *addr, &Payload::StartRequest)?;
            }
        }
        attempts += 1;
        sleep(COMMAND_ATTEMPT_DELAY);
    }
    Ok(())
}

/// Stop every *stoppable* device in `selection`, retrying until each is
/// observed `Stopping` or `Bootloader` or the attempt budget is exhausted.
pub fn stop(
    registry: &NodeRegistry,
    adapter: &dyn GatewayAdapter,
    selection: &[NodeAddress],
) -> Result<(), ControllerError> {
    let targets = registry.stoppable_devices(selection);
    let is_terminal = |registry: &NodeRegistry, addr: NodeAddress| {
        matches!(
            registry.get(addr).map(|s| s.lifecycle),
            Some(Lifecycle::Stopping) | Some(Lifecycle::Bootloader)
        )
    };
    let is_done = |registry: &NodeRegistry| targets.iter().all(|addr| is_terminal(registry, *addr));

    let mut attempts = 0;
    while attempts < COMMAND_MAX_ATTEMPTS && !is_done(registry) {
        if selection.is_empty() {
            send(adapter, NodeAddress::BROADCAST, &Payload::StopRequest)?;
        } else {
            for addr in &targets {
                if is_terminal(registry, *addr) {
                    continue;
                }
                send(adapter, *addr, &Payload::StopRequest)?;
            }
        }
        attempts += 1;
        sleep(COMMAND_ATTEMPT_DELAY);
    }
    Ok(())
}

/// Reset every selected, currently-*ready* device to `locations[addr]`.
/// No retry: the node transitions through `Resetting` on its own.
///
/// Refuses (sends nothing) if any selected address lacks a location
/// (spec.md §8 scenario 5).
pub fn reset(
    registry: &NodeRegistry,
    adapter: &dyn GatewayAdapter,
    selection: &[NodeAddress],
    locations: &HashMap<NodeAddress, ResetLocation>,
) -> Result<(), ControllerError> {
    let missing: Vec<NodeAddress> = selection.iter().copied().filter(|a| !locations.contains_key(a)).collect();
    if !missing.is_empty() {
        return Err(ControllerError::ResetLocationMismatch { missing });
    }

    let ready = registry.ready_devices(&[]);
    for addr in selection {
        if !ready.contains(addr) {
            continue;
        }
        let location = locations[addr];
        send(
            adapter,
            *addr,
            &Payload::ResetRequest { pos_x: location.pos_x, pos_y: location.pos_y },
        )?;
    }
    Ok(())
}

/// Fire-and-forget text message: broadcast if `selection` is empty,
/// otherwise one unicast per *running* selected address.
pub fn message(
    registry: &NodeRegistry,
    adapter: &dyn GatewayAdapter,
    selection: &[NodeAddress],
    text: &str,
) -> Result<(), ControllerError> {
    let payload = Payload::Message { message: text.as_bytes().to_vec() };
    if selection.is_empty() {
        send(adapter, NodeAddress::BROADCAST, &payload)?;
    } else {
        let running = registry.running_devices(selection);
        for addr in selection {
            if !running.contains(addr) {
                continue;
            }
            send(adapter, *addr, &payload)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::DeviceType;
    use crate::gateway::test_support::FakeGateway;
    use crate::registry::NodeStatus;
    use std::time::{Duration, Instant};

    fn status(lifecycle: Lifecycle) -> NodeStatus {
        NodeStatus { device_type: DeviceType::DotBotV3, lifecycle, battery_mv: 3000, pos_x: 0, pos_y: 0 }
    }

    #[test]
    fn start_broadcasts_when_selection_empty_and_gives_up_after_max_attempts() {
        let registry = NodeRegistry::new();
        let addr = NodeAddress(1);
        registry.update(addr, status(Lifecycle::Bootloader));
        let gateway = FakeGateway::new();

        let began = Instant::now();
        start(&registry, &gateway, &[]).unwrap();
        // Device never acks Running, so every attempt is spent: 5 * 0.7s.
        assert!(began.elapsed() >= Duration::from_millis(5 * 700 - 50));

        let sent = gateway.sent_to(NodeAddress::BROADCAST);
        assert_eq!(sent.len(), 5);
        assert!(sent.iter().all(|p| *p == Payload::StartRequest));
    }

    #[test]
    fn start_stops_retrying_once_running_is_observed() {
        let registry = NodeRegistry::new();
        let addr = NodeAddress(1);
        registry.update(addr, status(Lifecycle::Running));
        let gateway = FakeGateway::new();

        start(&registry, &gateway, &[]).unwrap();
        // Already running: predicate holds immediately, loop never sends.
        assert!(gateway.sent_to(NodeAddress::BROADCAST).is_empty());
    }

    #[test]
    fn start_with_selection_unicasts_to_ready_targets_only() {
        let registry = NodeRegistry::new();
        let ready = NodeAddress(1);
        let running = NodeAddress(2);
        registry.update(ready, status(Lifecycle::Bootloader));
        registry.update(running, status(Lifecycle::Running));
        let gateway = FakeGateway::new();

        start(&registry, &gateway, &[ready, running]).unwrap();

        assert_eq!(gateway.sent_to(ready).len(), 5);
        assert!(gateway.sent_to(running).is_empty());
    }

    #[test]
    fn reset_refuses_when_location_missing() {
        let registry = NodeRegistry::new();
        let a = NodeAddress(1);
        let b = NodeAddress(2);
        registry.update(a, status(Lifecycle::Bootloader));
        registry.update(b, status(Lifecycle::Bootloader));
        let gateway = FakeGateway::new();
        let mut locations = HashMap::new();
        locations.insert(a, ResetLocation { pos_x: 1, pos_y: 2 });

        let result = reset(&registry, &gateway, &[a, b], &locations);
        assert!(matches!(result, Err(ControllerError::ResetLocationMismatch { .. })));
        assert!(gateway.sent.lock().unwrap().is_empty());
    }

    #[test]
    fn reset_sends_unicast_to_ready_device_with_location() {
        let registry = NodeRegistry::new();
        let addr = NodeAddress(1);
        registry.update(addr, status(Lifecycle::Bootloader));
        let gateway = FakeGateway::new();
        let mut locations = HashMap::new();
        locations.insert(addr, ResetLocation { pos_x: 1_000_000, pos_y: -2_000_000 });

        reset(&registry, &gateway, &[addr], &locations).unwrap();

        let sent = gateway.sent_to(addr);
        assert_eq!(sent, vec![Payload::ResetRequest { pos_x: 1_000_000, pos_y: -2_000_000 }]);
    }

    #[test]
    fn message_broadcasts_without_selection() {
        let registry = NodeRegistry::new();
        let gateway = FakeGateway::new();
        message(&registry, &gateway, &[], "hi").unwrap();
        assert_eq!(gateway.sent_to(NodeAddress::BROADCAST), vec![Payload::Message { message: b"hi".to_vec() }]);
    }

    #[test]
    fn message_skips_non_running_selected_devices() {
        let registry = NodeRegistry::new();
        let running = NodeAddress(1);
        let idle = NodeAddress(2);
        registry.update(running, status(Lifecycle::Running));
        registry.update(idle, status(Lifecycle::Bootloader));
        let gateway = FakeGateway::new();

        message(&registry, &gateway, &[running, idle], "hi").unwrap();

        assert_eq!(gateway.sent_to(running).len(), 1);
        assert!(gateway.sent_to(idle).is_empty());
    }
}
