//! Outbound per-connection frame channel
//!
//! Sessions and tournaments only ever see a `SessionTransport`; the socket task
//! on the other end owns the receiver and writes to the network.

use bytes::Bytes;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::protocol::ControlEvent;

/// Frames buffered per connection before new ones are dropped
pub const FRAME_BUFFER: usize = 64;

/// One outbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum ServerFrame {
    /// 24-byte binary snapshot
    Snapshot(Bytes),
    /// JSON control event
    Control(ControlEvent),
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport closed")]
    Closed,
}

/// Sending half of a player's connection
#[derive(Debug, Clone)]
pub struct SessionTransport {
    player_id: Uuid,
    tx: mpsc::Sender<ServerFrame>,
}

impl SessionTransport {
    pub fn new(player_id: Uuid, tx: mpsc::Sender<ServerFrame>) -> Self {
        Self { player_id, tx }
    }

    /// Create a transport together with the receiver a socket writer drains
    pub fn channel(player_id: Uuid, capacity: usize) -> (Self, mpsc::Receiver<ServerFrame>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(player_id, tx), rx)
    }

    pub fn player_id(&self) -> Uuid {
        self.player_id
    }

    /// Non-blocking send. `Ok(false)` means the frame was dropped because the
    /// client is not keeping up; `Err` means the connection is gone.
    pub fn send(&self, frame: ServerFrame) -> Result<bool, TransportError> {
        match self.tx.try_send(frame) {
            Ok(()) => Ok(true),
            Err(mpsc::error::TrySendError::Full(_)) => Ok(false),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(TransportError::Closed),
        }
    }

    pub fn send_control(&self, event: ControlEvent) -> Result<bool, TransportError> {
        self.send(ServerFrame::Control(event))
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Two handles feeding the same receiver
    pub fn same_channel(&self, other: &SessionTransport) -> bool {
        self.tx.same_channel(&other.tx)
    }
}
