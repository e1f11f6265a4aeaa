//! Typed in-process message bus.
//!
//! Two FIFO queues: the main queue feeds the orchestrator (commands, alerts,
//! position updates, status requests); the reply queue carries status
//! responses back to the operator console. Per-sender ordering follows from
//! each sender owning a single producer handle onto a FIFO channel;
//! cross-sender ordering is unspecified.

use atc_core::AircraftState;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::clock;

/// Controller command verbs the orchestrator dispatches to aircraft.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CommandVerb {
    Altitude,
    Speed,
    Heading,
    Emergency,
    Status,
}

impl std::fmt::Display for CommandVerb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CommandVerb::Altitude => "ALTITUDE",
            CommandVerb::Speed => "SPEED",
            CommandVerb::Heading => "HEADING",
            CommandVerb::Emergency => "EMERGENCY",
            CommandVerb::Status => "STATUS",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandData {
    pub target_id: String,
    pub verb: CommandVerb,
    pub params: Vec<String>,
}

/// Full alert payload for a separation warning or violation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertData {
    /// 0-3
    pub level: u8,
    pub aircraft1: String,
    pub aircraft2: String,
    pub horizontal_separation: f64,
    pub vertical_separation: f64,
    /// Seconds until closest approach; 0 for a current violation.
    pub time_to_violation: f64,
    pub description: String,
    /// Monotonic milliseconds.
    pub at: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusData {
    pub target_id: String,
    pub text: String,
    /// Monotonic milliseconds.
    pub at: u64,
}

/// The message kinds exchanged between components.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Message {
    PositionUpdate(AircraftState),
    Command(CommandData),
    Alert(AlertData),
    StatusRequest { target: Option<String> },
    StatusResponse(StatusData),
}

/// A message plus its origin metadata.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub sender: String,
    /// Monotonic milliseconds at send.
    pub timestamp: u64,
    pub message: Message,
}

/// Terminal bus error: every peer hung up.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("message bus shut down")]
pub struct BusClosed;

/// Producer handle bound to one sender identity.
#[derive(Debug, Clone)]
pub struct BusSender {
    id: String,
    tx: Sender<Envelope>,
}

impl BusSender {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn send(&self, message: Message) -> Result<(), BusClosed> {
        self.tx
            .send(Envelope {
                sender: self.id.clone(),
                timestamp: clock::monotonic_ms(),
                message,
            })
            .map_err(|_| BusClosed)
    }

    /// Non-blocking send for real-time paths; drops the message when the
    /// queue is saturated and reports whether it was accepted.
    pub fn try_send(&self, message: Message) -> Result<bool, BusClosed> {
        match self.tx.try_send(Envelope {
            sender: self.id.clone(),
            timestamp: clock::monotonic_ms(),
            message,
        }) {
            Ok(()) => Ok(true),
            Err(TrySendError::Full(_)) => Ok(false),
            Err(TrySendError::Disconnected(_)) => Err(BusClosed),
        }
    }
}

/// Consumer handle over one queue.
#[derive(Debug, Clone)]
pub struct BusReceiver {
    rx: Receiver<Envelope>,
}

impl BusReceiver {
    /// Timed receive: `Ok(Some)` on a message, `Ok(None)` on timeout,
    /// `Err(BusClosed)` once every sender is gone.
    pub fn receive(&self, timeout: Duration) -> Result<Option<Envelope>, BusClosed> {
        match self.rx.recv_timeout(timeout) {
            Ok(envelope) => Ok(Some(envelope)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(BusClosed),
        }
    }

    /// Drain without blocking.
    pub fn try_receive(&self) -> Option<Envelope> {
        self.rx.try_recv().ok()
    }
}

/// The bus endpoints: everything writes toward the orchestrator on `main`,
/// status responses flow back to the console on `reply`.
pub struct MessageBus {
    main_tx: Sender<Envelope>,
    main_rx: Receiver<Envelope>,
    reply_tx: Sender<Envelope>,
    reply_rx: Receiver<Envelope>,
}

impl MessageBus {
    pub fn new() -> Self {
        let (main_tx, main_rx) = unbounded();
        let (reply_tx, reply_rx) = unbounded();
        Self {
            main_tx,
            main_rx,
            reply_tx,
            reply_rx,
        }
    }

    /// A producer onto the main queue with the given sender identity.
    pub fn sender(&self, id: impl Into<String>) -> BusSender {
        BusSender {
            id: id.into(),
            tx: self.main_tx.clone(),
        }
    }

    /// The orchestrator's consumer end of the main queue.
    pub fn receiver(&self) -> BusReceiver {
        BusReceiver {
            rx: self.main_rx.clone(),
        }
    }

    /// A producer onto the reply queue (status responses).
    pub fn reply_sender(&self, id: impl Into<String>) -> BusSender {
        BusSender {
            id: id.into(),
            tx: self.reply_tx.clone(),
        }
    }

    /// The console's consumer end of the reply queue.
    pub fn reply_receiver(&self) -> BusReceiver {
        BusReceiver {
            rx: self.reply_rx.clone(),
        }
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}
