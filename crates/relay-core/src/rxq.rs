//! Receive event queue
//!
//! A single FIFO fed by every channel reader and the IGate receive task.
//! Exactly one consumer drains it, which serializes everything that
//! touches digipeater, IGate and link layer state.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use relay_packet::{Address, Packet};
use tracing::trace;

/// What made a channel busy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    /// Our own transmitter is keyed
    Ptt,
    /// Carrier detected from someone else
    Dcd,
}

/// Events processed by the single protocol thread
#[derive(Debug, Clone, PartialEq)]
pub enum RxEvent {
    /// Frame heard on a channel
    RecFrame {
        /// Channel the frame arrived on
        chan: usize,
        /// Demodulator within the channel
        subchan: usize,
        /// Slicer within the demodulator
        slice: usize,
        /// The frame
        packet: Packet,
        /// Decoder diagnostics, free form
        spectrum: String,
    },
    /// Client asks for a connected mode session
    ConnectRequest {
        /// Own call then peer call, then any vias
        addrs: Vec<Address>,
        /// Radio channel
        chan: usize,
        /// Client application id
        client: usize,
    },
    /// Client asks to end a session
    DisconnectRequest {
        /// Own call then peer call
        addrs: Vec<Address>,
        /// Radio channel
        chan: usize,
        /// Client application id
        client: usize,
    },
    /// Client data for an established session
    XmitDataRequest {
        /// Own call then peer call
        addrs: Vec<Address>,
        /// Radio channel
        chan: usize,
        /// Client application id
        client: usize,
        /// Protocol id
        pid: u8,
        /// Payload
        data: Vec<u8>,
    },
    /// Client wants incoming connections for a call
    RegisterCallsign {
        /// Call to accept
        addr: Address,
        /// Radio channel
        chan: usize,
        /// Client application id
        client: usize,
    },
    /// Client no longer wants incoming connections for a call
    UnregisterCallsign {
        /// Call to drop
        addr: Address,
        /// Radio channel
        chan: usize,
        /// Client application id
        client: usize,
    },
    /// Client asks how many frames are still unacknowledged
    OutstandingFramesRequest {
        /// Own call then peer call
        addrs: Vec<Address>,
        /// Radio channel
        chan: usize,
        /// Client application id
        client: usize,
    },
    /// Channel busy status changed
    ChannelBusy {
        /// Radio channel
        chan: usize,
        /// Transmitter or carrier
        activity: Activity,
        /// Busy now
        status: bool,
    },
    /// Transmitter confirms the channel was seized
    SeizeConfirm {
        /// Radio channel
        chan: usize,
    },
    /// Client went away; release everything it held
    ClientCleanup {
        /// Client application id
        client: usize,
    },
}

impl RxEvent {
    /// Received frame event with default demodulator indexes
    pub fn frame(chan: usize, packet: Packet) -> Self {
        RxEvent::RecFrame {
            chan,
            subchan: 0,
            slice: 0,
            packet,
            spectrum: String::new(),
        }
    }

    /// Is this a received frame
    pub fn is_frame(&self) -> bool {
        matches!(self, RxEvent::RecFrame { .. })
    }

    /// Does this event come from a client application
    pub fn is_client_request(&self) -> bool {
        matches!(
            self,
            RxEvent::ConnectRequest { .. }
                | RxEvent::DisconnectRequest { .. }
                | RxEvent::XmitDataRequest { .. }
                | RxEvent::RegisterCallsign { .. }
                | RxEvent::UnregisterCallsign { .. }
                | RxEvent::OutstandingFramesRequest { .. }
                | RxEvent::ClientCleanup { .. }
        )
    }

    /// Channel the event concerns, if any
    pub fn channel(&self) -> Option<usize> {
        match self {
            RxEvent::RecFrame { chan, .. }
            | RxEvent::ConnectRequest { chan, .. }
            | RxEvent::DisconnectRequest { chan, .. }
            | RxEvent::XmitDataRequest { chan, .. }
            | RxEvent::RegisterCallsign { chan, .. }
            | RxEvent::UnregisterCallsign { chan, .. }
            | RxEvent::OutstandingFramesRequest { chan, .. }
            | RxEvent::ChannelBusy { chan, .. }
            | RxEvent::SeizeConfirm { chan } => Some(*chan),
            RxEvent::ClientCleanup { .. } => None,
        }
    }
}

/// Shared FIFO of receive events
#[derive(Default)]
pub struct RxQueue {
    events: Mutex<VecDeque<RxEvent>>,
    wake: Condvar,
}

impl RxQueue {
    /// Empty queue
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<RxEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add an event and wake the consumer
    pub fn push(&self, event: RxEvent) {
        trace!("rx queue push {:?}", event.channel());
        self.lock().push_back(event);
        self.wake.notify_one();
    }

    /// Remove the oldest event without waiting
    pub fn try_pop(&self) -> Option<RxEvent> {
        self.lock().pop_front()
    }

    /// Remove the oldest event, waiting up to `timeout` for one to arrive.
    ///
    /// `None` waits indefinitely.
    pub fn pop(&self, timeout: Option<Duration>) -> Option<RxEvent> {
        let mut events = self.lock();
        match timeout {
            None => {
                while events.is_empty() {
                    events = self.wake.wait(events).unwrap_or_else(PoisonError::into_inner);
                }
            }
            Some(timeout) => {
                events = self
                    .wake
                    .wait_timeout_while(events, timeout, |e| e.is_empty())
                    .unwrap_or_else(PoisonError::into_inner)
                    .0;
            }
        }
        events.pop_front()
    }

    /// Block until an event is queued or `timeout` passes, leaving the
    /// event in place.
    ///
    /// Returns `true` on timeout. The consumer uses this to service the
    /// next protocol timer without polling.
    pub fn wait_while_empty(&self, timeout: Option<Duration>) -> bool {
        let events = self.lock();
        match timeout {
            None => {
                let _events = self
                    .wake
                    .wait_while(events, |e| e.is_empty())
                    .unwrap_or_else(PoisonError::into_inner);
                false
            }
            Some(timeout) => {
                let (_events, result) = self
                    .wake
                    .wait_timeout_while(events, timeout, |e| e.is_empty())
                    .unwrap_or_else(PoisonError::into_inner);
                result.timed_out()
            }
        }
    }

    /// Number of queued events
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Nothing queued
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
