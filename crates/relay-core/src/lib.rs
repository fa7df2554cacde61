//! Relay Core
//!
//! This crate holds the decision logic and queues of a packet radio relay
//! node:
//!
//! - **Digipeater**: APRS WIDEn-N, alias, preemptive and hop-limited
//!   digipeating with duplicate suppression
//! - **Connected mode digipeater**: explicit call or alias only
//! - **History**: fixed size ring of recent packet checksums
//! - **Transmit queue**: two priority lists per channel
//! - **Receive queue**: one FIFO of events for the protocol thread
//! - **Filters**: the predicate seam plus a built in expression evaluator
//!
//! # Architecture
//!
//! Channel readers push [`RxEvent`]s onto the shared [`RxQueue`]. A single
//! consumer pops them and hands received frames to the [`Digipeater`] and
//! [`ConnectedDigipeater`], which append rewritten copies to the
//! [`TxQueue`]. One transmitter per channel drains that queue, high
//! priority first.
//!
//! Because exactly one thread drives the engines they take `&mut self` and
//! need no internal locking. The queues are the only shared state.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use relay_core::{
//!     AcceptAll, ChannelConfig, Channels, DigiConfig, DigiRuleConfig, Digipeater, Priority,
//!     TxQueue,
//! };
//! use relay_packet::Packet;
//!
//! let channels = Channels::new(&[ChannelConfig::radio("WB2OSZ-9")]);
//! let config = DigiConfig {
//!     rules: vec![DigiRuleConfig::new(0, 0, "^WIDE1-1$", "^WIDE[1-7]-[1-7]$")],
//!     ..Default::default()
//! };
//! let txq = Arc::new(TxQueue::new(channels.media()));
//! let mut digi = Digipeater::new(channels, &config, Arc::new(AcceptAll), Arc::clone(&txq));
//!
//! let heard = Packet::from_text("W1ABC>APRS,WIDE2-2:>hello", true).unwrap();
//! digi.digipeat(0, &heard);
//!
//! let sent = txq.remove(0, Priority::High).and_then(|e| e.into_packet()).unwrap();
//! assert_eq!(sent.to_text(), "W1ABC>APRS,WB2OSZ-9*,WIDE2-1:>hello");
//! ```

pub mod cdigipeater;
pub mod config;
pub mod digipeater;
pub mod error;
pub mod filter;
pub mod history;
pub mod rxq;
pub mod txq;

// Re-export engine types
pub use cdigipeater::ConnectedDigipeater;
pub use digipeater::{DigiObserver, Digipeater, DEDUPE_HISTORY_SIZE};

// Re-export configuration types
pub use config::{
    compile_pattern, CdigiConfig, CdigiRuleConfig, ChannelConfig, Channels, DigiConfig,
    DigiRuleConfig, Medium, Preempt, RuleMatrix, DEFAULT_DEDUPE_SECS,
};

// Re-export queue types
pub use rxq::{Activity, RxEvent, RxQueue};
pub use txq::{Priority, TxEntry, TxQueue, APRS_QUEUE_LIMIT, DATA_QUEUE_WARN};

pub use error::{FilterError, RelayError};
pub use filter::{AcceptAll, ExprFilter, PacketFilter, IGATE_CHANNEL};
pub use history::{History, HistoryEntry};
