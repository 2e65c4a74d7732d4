//! Gateway adapter (component C2).
//!
//! Abstracts the transport between the controller and the radio mesh. Per
//! spec.md §1/§4.2, concrete transports are external collaborators; this
//! module defines the contractual trait the rest of the controller depends
//! on, plus two illustrative implementations in the teacher's idiom.

pub mod cloud;
pub mod edge;
pub mod link;

use std::sync::Arc;

use crate::address::NodeAddress;
use crate::codec::Payload;
use crate::error::ControllerError;

/// Invoked once per inbound frame, serially (spec.md §5: "the adapter must
/// invoke the callback serially ... If the underlying transport is
/// multi-threaded, the adapter serialises internally").
pub type FrameCallback = Arc<dyn Fn(NodeAddress, Payload) + Send + Sync>;

/// Capability set a gateway transport must provide (spec.md §4.2).
pub trait GatewayAdapter: Send {
    /// Begin delivering inbound frames to `on_frame`.
    fn init(&mut self, on_frame: FrameCallback) -> Result<(), ControllerError>;

    /// Best-effort transmit; no delivery guarantee. `destination ==
    /// NodeAddress::BROADCAST` means "all nodes".
    fn send(&self, destination: NodeAddress, payload: &Payload) -> Result<(), ControllerError>;

    /// Release resources held by the adapter.
    fn close(&mut self);
}
