//! Relay IGate
//!
//! Gateway between the radio channels of a relay node and an APRS-IS
//! server.
//!
//! - **RF to Internet**: heard frames are filtered, unwrapped, trimmed and
//!   sent with a `qAR` (or `qAO` when receive only) path construct
//! - **Internet to RF**: server lines are filtered, rate limited, wrapped in
//!   a third party header and queued for transmission
//! - **SATgate**: directly heard packets can be held back so a copy via a
//!   digipeater or satellite reaches the server first
//! - **ICHANNEL**: server traffic can also appear as received frames on a
//!   virtual channel
//!
//! # Architecture
//!
//! [`Igate`] holds the shared state and the synchronous gating logic. The
//! network side runs as tokio tasks started by [`igate_start`]: a connect
//! manager that owns each server session, and an optional SATgate ticker.
//! The protocol thread calls [`Igate::send_rf_packet`] directly; lines reach
//! the session through an unbounded channel.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use relay_core::{ChannelConfig, Channels, ExprFilter, RxQueue, TxQueue};
//! use relay_igate::{igate_start, Igate, IgateConfig, Timing};
//!
//! # async fn run() {
//! let channels = Channels::new(&[ChannelConfig::radio("WB2OSZ-5")]);
//! let txq = Arc::new(TxQueue::new(channels.media()));
//! let config = IgateConfig {
//!     server: "noam.aprs2.net".into(),
//!     login: "WB2OSZ-5".into(),
//!     passcode: "12345".into(),
//!     tx_chan: Some(0),
//!     ..Default::default()
//! };
//! let igate = Arc::new(Igate::new(config, channels, Arc::new(ExprFilter), txq, Arc::new(RxQueue::new())));
//! let _tasks = igate_start(&igate, Timing::default());
//! # }
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod gateway;
pub mod message;
pub mod session;
pub mod stats;

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::info;

pub use codec::{encode_line, LineDecoder, MAX_LINE_LEN, MAX_PENDING_LEN};
pub use config::{IgateConfig, APP_TOCALL, DEFAULT_PORT};
pub use error::IgateError;
pub use gateway::{ConnState, Igate, ICHANNEL_SPECTRUM, RX_HISTORY_SIZE, TX_HISTORY_SIZE};
pub use message::is_message_message;
pub use session::{run_connect_manager, run_satgate_ticker, run_session, Timing};
pub use stats::{IgateStats, StatsSnapshot};

/// Start the IGate tasks on the current tokio runtime.
///
/// Does nothing unless server, login and passcode are all configured.
pub fn igate_start(igate: &Arc<Igate>, timing: Timing) -> Vec<JoinHandle<()>> {
    let config = igate.config();
    if !config.is_enabled() {
        info!("IGate not started: server, login and passcode are all required");
        return Vec::new();
    }

    info!(
        "IGate starting: server {}:{}, login {}, {}",
        config.server,
        config.port,
        config.login,
        match config.tx_chan {
            Some(chan) => format!("transmit on channel {}", chan),
            None => "receive only".to_string(),
        }
    );

    let mut tasks = vec![tokio::spawn(run_connect_manager(Arc::clone(igate), timing))];
    if config.satgate_delay().is_some() {
        tasks.push(tokio::spawn(run_satgate_ticker(
            Arc::clone(igate),
            timing.satgate_poll,
        )));
    }
    tasks
}
