//! OTA Engine (component C5): Start-OTA handshake and chunk transfer.
//!
//! Grounded in `testbed/swarmit/controller.py::_send_start_ota`/`send_chunk`/
//! `start_ota`/`transfer`. Ack state is shared between this module's send
//! loops (the controller's main thread) and the inbound frame callback (the
//! adapter's reader thread), so it lives behind a mutex here rather than as
//! plain fields, unlike the original's single-threaded Python object.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::thread::sleep;
use std::time::{Duration, Instant};

use crate::address::NodeAddress;
use crate::codec::Payload;
use crate::constants::{OTA_UNICAST_START_GAP, POLL_QUANTUM_OTA};
use crate::error::ControllerError;
use crate::gateway::GatewayAdapter;

use super::chunk::DataChunk;

/// Shared ack state for one Start-OTA handshake (spec.md §3 `StartOtaState`).
pub struct StartOtaState {
    acked: Mutex<HashSet<NodeAddress>>,
    retries: Mutex<u32>,
}

impl StartOtaState {
    pub fn new() -> Self {
        Self { acked: Mutex::new(HashSet::new()), retries: Mutex::new(0) }
    }

    /// Record an `OTA_START_ACK` from `addr`. Idempotent.
    pub fn ack(&self, addr: NodeAddress) {
        self.acked.lock().unwrap().insert(addr);
    }

    pub fn acked_addrs(&self) -> HashSet<NodeAddress> {
        self.acked.lock().unwrap().clone()
    }

    fn retries(&self) -> u32 {
        *self.retries.lock().unwrap()
    }

    /// Single retry counter shared across every target address contacted
    /// during one handshake, matching `StartOtaData.retries` in the
    /// original: a unicast rollout against many devices draws down the same
    /// budget rather than resetting per address.
    fn bump_retries(&self) {
        *self.retries.lock().unwrap() += 1;
    }
}

impl Default for StartOtaState {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of a Start-OTA handshake (spec.md §4.5.2).
#[derive(Debug, Clone)]
pub struct StartOtaResult {
    pub total_chunks: u32,
    pub image_digest: [u8; 32],
    pub acked: Vec<NodeAddress>,
    pub missed: Vec<NodeAddress>,
}

fn send_and_wait_for_start_ack(
    adapter: &dyn GatewayAdapter,
    state: &StartOtaState,
    target: NodeAddress,
    devices_to_flash: &[NodeAddress],
    payload: &Payload,
    max_retries: u32,
    timeout: Duration,
) -> Result<(), ControllerError> {
    let is_acked = || {
        if target.is_broadcast() {
            let acked = state.acked_addrs();
            devices_to_flash.iter().all(|a| acked.contains(a))
        } else {
            state.acked_addrs().contains(&target)
        }
    };

    let mut last_send = Instant::now();
    let mut need_send = true;
    while !is_acked() && state.retries() <= max_retries {
        if need_send {
            adapter.send(target, payload)?;
            last_send = Instant::now();
            state.bump_retries();
            need_send = false;
        }
        sleep(POLL_QUANTUM_OTA);
        need_send = last_send.elapsed() > timeout;
    }
    Ok(())
}

/// Run the Start-OTA handshake against `devices_to_flash`.
///
/// `selection` empty means broadcast the handshake once and wait for every
/// device in `devices_to_flash`; otherwise unicast to each in turn with a
/// gap between sends.
pub fn start_ota(
    adapter: &dyn GatewayAdapter,
    state: &StartOtaState,
    selection: &[NodeAddress],
    devices_to_flash: &[NodeAddress],
    fw_length: u32,
    fw_chunk_count: u32,
    image_digest: [u8; 32],
    max_retries: u32,
    timeout: Duration,
) -> Result<StartOtaResult, ControllerError> {
    let payload = Payload::OtaStart { fw_length, fw_chunk_count };

    if selection.is_empty() {
        send_and_wait_for_start_ack(
            adapter,
            state,
            NodeAddress::BROADCAST,
            devices_to_flash,
            &payload,
            max_retries,
            timeout,
        )?;
    } else {
        for addr in devices_to_flash {
            send_and_wait_for_start_ack(adapter, state, *addr, devices_to_flash, &payload, max_retries, timeout)?;
            sleep(OTA_UNICAST_START_GAP);
        }
    }

    let acked_set = state.acked_addrs();
    let mut acked: Vec<NodeAddress> = acked_set.iter().copied().collect();
    acked.sort();
    let mut missed: Vec<NodeAddress> = devices_to_flash.iter().copied().filter(|a| !acked_set.contains(a)).collect();
    missed.sort();

    Ok(StartOtaResult { total_chunks: fw_chunk_count, image_digest, acked, missed })
}

/// Per-chunk ack state for one device (spec.md §3 `ChunkAckState`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChunkAckState {
    pub acked: bool,
    pub retries: u32,
}

/// Per-device transfer outcome (spec.md §3 `TransferStatus`).
#[derive(Debug, Clone)]
pub struct TransferStatus {
    pub chunks: Vec<ChunkAckState>,
    pub success: bool,
}

/// Shared ack state for one `transfer` call, keyed by device address.
pub struct TransferState {
    inner: Mutex<HashMap<NodeAddress, Vec<ChunkAckState>>>,
}

impl TransferState {
    pub fn new(devices_to_flash: &[NodeAddress], chunk_count: usize) -> Self {
        let mut map = HashMap::new();
        for addr in devices_to_flash {
            map.insert(*addr, vec![ChunkAckState::default(); chunk_count]);
        }
        Self { inner: Mutex::new(map) }
    }

    /// Record an `OTA_CHUNK_ACK` for `(addr, index)`. Returns `false` if
    /// `addr` is not part of this transfer or `index` is out of range, in
    /// which case the caller should drop the frame with a verbose warning
    /// (spec.md §4.5.3). Idempotent otherwise.
    pub fn ack(&self, addr: NodeAddress, index: u32) -> bool {
        let mut guard = self.inner.lock().unwrap();
        match guard.get_mut(&addr).and_then(|chunks| chunks.get_mut(index as usize)) {
            Some(state) => {
                state.acked = true;
                true
            }
            None => false,
        }
    }

    fn set_retries(&self, addr: NodeAddress, index: u32, retries: u32) {
        if let Some(state) = self.inner.lock().unwrap().get_mut(&addr).and_then(|c| c.get_mut(index as usize)) {
            state.retries = retries;
        }
    }

    fn is_chunk_acked(&self, addr: NodeAddress, index: u32) -> bool {
        self.inner
            .lock()
            .unwrap()
            .get(&addr)
            .and_then(|chunks| chunks.get(index as usize))
            .map(|c| c.acked)
            .unwrap_or(false)
    }

    /// Finalize into the public per-device `TransferStatus` map: `success`
    /// is set once, after the chunk loop, not tracked incrementally.
    pub fn finalize(&self) -> HashMap<NodeAddress, TransferStatus> {
        self.inner
            .lock()
            .unwrap()
            .iter()
            .map(|(addr, chunks)| {
                let success = chunks.iter().all(|c| c.acked);
                (*addr, TransferStatus { chunks: chunks.clone(), success })
            })
            .collect()
    }
}

fn send_and_wait_for_chunk_ack(
    adapter: &dyn GatewayAdapter,
    state: &TransferState,
    target: NodeAddress,
    devices_to_flash: &[NodeAddress],
    chunk: &DataChunk,
    max_retries: u32,
    timeout: Duration,
) -> Result<(), ControllerError> {
    let payload = Payload::OtaChunk {
        index: chunk.index,
        count: chunk.payload.len() as u8,
        sha: chunk.sha8,
        chunk: chunk.payload.clone(),
    };

    let is_acked = || {
        if target.is_broadcast() {
            devices_to_flash.iter().all(|a| state.is_chunk_acked(*a, chunk.index))
        } else {
            state.is_chunk_acked(target, chunk.index)
        }
    };

    let mut retries_count = 0u32;
    let mut last_send = Instant::now();
    let mut need_send = true;
    while !is_acked() && retries_count <= max_retries {
        if need_send {
            adapter.send(target, &payload)?;
            if target.is_broadcast() {
                for addr in devices_to_flash {
                    state.set_retries(*addr, chunk.index, retries_count);
                }
            } else {
                state.set_retries(target, chunk.index, retries_count);
            }
            last_send = Instant::now();
            retries_count += 1;
            need_send = false;
        }
        sleep(POLL_QUANTUM_OTA);
        need_send = last_send.elapsed() > timeout;
    }
    Ok(())
}

/// Stream every chunk, in order, to `devices_to_flash`.
///
/// Chunk *i+1* is not sent until chunk *i* is acked by all targets or its
/// retry budget is exhausted (spec.md §4.5.3 ordering guarantee).
pub fn transfer(
    adapter: &dyn GatewayAdapter,
    state: &TransferState,
    selection: &[NodeAddress],
    devices_to_flash: &[NodeAddress],
    chunks: &[DataChunk],
    max_retries: u32,
    timeout: Duration,
) -> Result<HashMap<NodeAddress, TransferStatus>, ControllerError> {
    for chunk in chunks {
        if selection.is_empty() {
            send_and_wait_for_chunk_ack(
                adapter,
                state,
                NodeAddress::BROADCAST,
                devices_to_flash,
                chunk,
                max_retries,
                timeout,
            )?;
        } else {
            for addr in devices_to_flash {
                send_and_wait_for_chunk_ack(adapter, state, *addr, devices_to_flash, chunk, max_retries, timeout)?;
            }
        }
    }
    Ok(state.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::test_support::FakeGateway;
    use crate::ota::chunk::prepare;

    #[test]
    fn happy_path_one_device_l_300() {
        let firmware = vec![0xAAu8; 300];
        let prepared = prepare(&firmware);
        assert_eq!(prepared.chunk_count(), 3);
        assert_eq!(prepared.chunks[0].payload.len(), 128);
        assert_eq!(prepared.chunks[1].payload.len(), 128);
        assert_eq!(prepared.chunks[2].payload.len(), 44);

        let addr = NodeAddress(0xAB);
        let gateway = FakeGateway::new();
        let start_state = StartOtaState::new();

        // Simulate the node acking OTA_START immediately.
        start_state.ack(addr);
        let start_result = start_ota(
            &gateway,
            &start_state,
            &[],
            &[addr],
            firmware.len() as u32,
            prepared.chunk_count(),
            prepared.image_digest,
            10,
            Duration::from_millis(50),
        )
        .unwrap();
        assert_eq!(start_result.acked, vec![addr]);
        assert!(start_result.missed.is_empty());

        let transfer_state = TransferState::new(&[addr], prepared.chunks.len());
        // Ack every chunk as soon as it is sent, from a helper thread-free
        // vantage: mark acked right before calling transfer so the first
        // poll already observes completion (loop never retries).
        for chunk in &prepared.chunks {
            transfer_state.ack(addr, chunk.index);
        }
        let statuses = transfer(
            &gateway,
            &transfer_state,
            &[],
            &[addr],
            &prepared.chunks,
            10,
            Duration::from_millis(50),
        )
        .unwrap();

        let status = &statuses[&addr];
        assert!(status.success);
        assert_eq!(status.chunks.len(), 3);
        assert!(status.chunks.iter().all(|c| c.acked));
    }

    #[test]
    fn start_ota_with_no_ready_devices_sends_nothing() {
        let gateway = FakeGateway::new();
        let state = StartOtaState::new();
        let result = start_ota(&gateway, &state, &[], &[], 10, 1, [0u8; 32], 10, Duration::from_millis(10)).unwrap();
        assert!(result.acked.is_empty());
        assert!(result.missed.is_empty());
        assert!(gateway.sent.lock().unwrap().is_empty());
    }

    #[test]
    fn missed_start_ota_ack_is_reported_for_unacked_device() {
        let gateway = FakeGateway::new();
        let state = StartOtaState::new();
        let a = NodeAddress(1);
        let b = NodeAddress(2);
        state.ack(a); // B never acks.

        let result = start_ota(
            &gateway,
            &state,
            &[],
            &[a, b],
            10,
            1,
            [0u8; 32],
            1, // small retry budget keeps the test fast
            Duration::from_millis(1),
        )
        .unwrap();

        assert_eq!(result.acked, vec![a]);
        assert_eq!(result.missed, vec![b]);
    }

    #[test]
    fn chunk_ack_out_of_range_is_rejected() {
        let addr = NodeAddress(1);
        let state = TransferState::new(&[addr], 2);
        assert!(!state.ack(addr, 5));
        assert!(!state.ack(NodeAddress(99), 0));
        assert!(state.ack(addr, 0));
    }

    #[test]
    fn transfer_with_unacked_chunk_reports_failure_for_that_device() {
        let gateway = FakeGateway::new();
        let addr = NodeAddress(1);
        let chunks = prepare(&vec![0x11u8; 10]).chunks;
        let state = TransferState::new(&[addr], chunks.len());
        // Never ack: retries exhaust quickly with a 0 max_retries budget.
        let statuses = transfer(&gateway, &state, &[], &[addr], &chunks, 0, Duration::from_millis(1)).unwrap();
        assert!(!statuses[&addr].success);
        assert_eq!(gateway.sent_to(addr).len(), 0); // broadcast target, not unicast
    }
}
