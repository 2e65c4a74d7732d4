//! Node registry (component C3).
//!
//! Maintains `address -> NodeStatus` from inbound status notifications and
//! classifies nodes by lifecycle state. Matches `testbed/swarmit/controller.py`'s
//! `status_data` dict and its `ready_devices`/`running_devices`/
//! `resetting_devices` properties, generalized with a `stoppable` predicate
//! (spec.md §3) the original expresses ad hoc as `running_devices +
//! resetting_devices`.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::address::NodeAddress;
use crate::codec::{DeviceType, Lifecycle};

/// Snapshot of a node's last-reported status (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeStatus {
    pub device_type: DeviceType,
    pub lifecycle: Lifecycle,
    pub battery_mv: u16,
    pub pos_x: i32,
    pub pos_y: i32,
}

impl NodeStatus {
    /// *ready*: `lifecycle == Bootloader`.
    pub fn is_ready(&self) -> bool {
        matches!(self.lifecycle, Lifecycle::Bootloader)
    }

    /// *running*: `lifecycle ∈ {Running, Programming}`.
    pub fn is_running(&self) -> bool {
        matches!(self.lifecycle, Lifecycle::Running | Lifecycle::Programming)
    }

    /// *resetting*: `lifecycle == Resetting`.
    pub fn is_resetting(&self) -> bool {
        matches!(self.lifecycle, Lifecycle::Resetting)
    }

    /// *stoppable*: `running ∪ resetting`.
    pub fn is_stoppable(&self) -> bool {
        self.is_running() || self.is_resetting()
    }
}

/// `address -> NodeStatus`. Created empty at controller construction, grows
/// for the controller's lifetime, never evicts (spec.md §3/§4.3).
#[derive(Default)]
pub struct NodeRegistry {
    inner: Mutex<HashMap<NodeAddress, NodeStatus>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the record for `addr` atomically (no partial updates).
    pub fn update(&self, addr: NodeAddress, status: NodeStatus) {
        self.inner.lock().unwrap().insert(addr, status);
    }

    pub fn get(&self, addr: NodeAddress) -> Option<NodeStatus> {
        self.inner.lock().unwrap().get(&addr).copied()
    }

    /// Full snapshot, optionally restricted to `selection` (empty means "all").
    pub fn snapshot(&self, selection: &[NodeAddress]) -> HashMap<NodeAddress, NodeStatus> {
        let guard = self.inner.lock().unwrap();
        if selection.is_empty() {
            guard.clone()
        } else {
            guard
                .iter()
                .filter(|(addr, _)| selection.contains(addr))
                .map(|(addr, status)| (*addr, *status))
                .collect()
        }
    }

    fn addresses_matching(&self, selection: &[NodeAddress], pred: impl Fn(&NodeStatus) -> bool) -> Vec<NodeAddress> {
        let guard = self.inner.lock().unwrap();
        let mut addrs: Vec<NodeAddress> = guard
            .iter()
            .filter(|(addr, status)| (selection.is_empty() || selection.contains(addr)) && pred(status))
            .map(|(addr, _)| *addr)
            .collect();
        addrs.sort();
        addrs
    }

    pub fn ready_devices(&self, selection: &[NodeAddress]) -> Vec<NodeAddress> {
        self.addresses_matching(selection, NodeStatus::is_ready)
    }

    pub fn running_devices(&self, selection: &[NodeAddress]) -> Vec<NodeAddress> {
        self.addresses_matching(selection, NodeStatus::is_running)
    }

    pub fn resetting_devices(&self, selection: &[NodeAddress]) -> Vec<NodeAddress> {
        self.addresses_matching(selection, NodeStatus::is_resetting)
    }

    pub fn stoppable_devices(&self, selection: &[NodeAddress]) -> Vec<NodeAddress> {
        self.addresses_matching(selection, NodeStatus::is_stoppable)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(lifecycle: Lifecycle) -> NodeStatus {
        NodeStatus { device_type: DeviceType::DotBotV3, lifecycle, battery_mv: 3000, pos_x: 0, pos_y: 0 }
    }

    #[test]
    fn classification_predicates() {
        assert!(status(Lifecycle::Bootloader).is_ready());
        assert!(status(Lifecycle::Running).is_running());
        assert!(status(Lifecycle::Programming).is_running());
        assert!(status(Lifecycle::Resetting).is_resetting());
        assert!(status(Lifecycle::Running).is_stoppable());
        assert!(status(Lifecycle::Resetting).is_stoppable());
        assert!(!status(Lifecycle::Stopping).is_stoppable());
        assert!(!status(Lifecycle::Bootloader).is_stoppable());
    }

    #[test]
    fn update_overwrites_whole_row() {
        let reg = NodeRegistry::new();
        let addr = NodeAddress(1);
        reg.update(addr, status(Lifecycle::Bootloader));
        reg.update(addr, status(Lifecycle::Running));
        assert_eq!(reg.get(addr).unwrap().lifecycle, Lifecycle::Running);
    }

    #[test]
    fn selection_filters_classification() {
        let reg = NodeRegistry::new();
        let a = NodeAddress(1);
        let b = NodeAddress(2);
        reg.update(a, status(Lifecycle::Bootloader));
        reg.update(b, status(Lifecycle::Bootloader));
        assert_eq!(reg.ready_devices(&[]), vec![a, b]);
        assert_eq!(reg.ready_devices(&[a]), vec![a]);
    }
}
