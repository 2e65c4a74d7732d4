//! OTA Engine (component C5): firmware chunking plus the Start-OTA handshake
//! and chunk transfer state machines.

pub mod chunk;
pub mod engine;

pub use chunk::{prepare, DataChunk, PreparedFirmware};
pub use engine::{
    start_ota, transfer, ChunkAckState, StartOtaResult, StartOtaState, TransferState, TransferStatus,
};
