//! IGate traffic counters

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::SystemTime;

use serde::Serialize;

/// Counters updated from the receive task, the connect manager and the
/// protocol thread
#[derive(Debug, Default)]
pub struct IgateStats {
    failed_connects: AtomicU64,
    connects: AtomicU64,
    connect_at: Mutex<Option<SystemTime>>,
    rf_recv_packets: AtomicU64,
    uplink_packets: AtomicU64,
    uplink_bytes: AtomicU64,
    downlink_packets: AtomicU64,
    downlink_bytes: AtomicU64,
    rf_xmit_packets: AtomicU64,
    msg_cnt: AtomicU64,
}

/// Point in time copy of [`IgateStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Connection attempts that failed
    pub failed_connects: u64,
    /// Successful connections
    pub connects: u64,
    /// When the current connection was made
    pub connect_at: Option<SystemTime>,
    /// Packets offered from radio channels
    pub rf_recv_packets: u64,
    /// Packets sent to the server
    pub uplink_packets: u64,
    /// Bytes sent to the server, including login and heartbeats
    pub uplink_bytes: u64,
    /// Packet lines received from the server
    pub downlink_packets: u64,
    /// Bytes received from the server
    pub downlink_bytes: u64,
    /// Packets gated to radio
    pub rf_xmit_packets: u64,
    /// Of those, APRS messages
    pub msg_cnt: u64,
}

macro_rules! counter {
    ($get:ident, $inc:ident, $field:ident) => {
        /// Current value
        pub fn $get(&self) -> u64 {
            self.$field.load(Ordering::Relaxed)
        }

        pub(crate) fn $inc(&self) {
            self.$field.fetch_add(1, Ordering::Relaxed);
        }
    };
}

impl IgateStats {
    counter!(failed_connects, inc_failed_connects, failed_connects);
    counter!(connects, inc_connects, connects);
    counter!(rf_recv_packets, inc_rf_recv_packets, rf_recv_packets);
    counter!(uplink_packets, inc_uplink_packets, uplink_packets);
    counter!(downlink_packets, inc_downlink_packets, downlink_packets);
    counter!(rf_xmit_packets, inc_rf_xmit_packets, rf_xmit_packets);
    counter!(msg_cnt, inc_msg_cnt, msg_cnt);

    /// Bytes sent to the server
    pub fn uplink_bytes(&self) -> u64 {
        self.uplink_bytes.load(Ordering::Relaxed)
    }

    /// Bytes received from the server
    pub fn downlink_bytes(&self) -> u64 {
        self.downlink_bytes.load(Ordering::Relaxed)
    }

    pub(crate) fn add_uplink_bytes(&self, n: usize) {
        self.uplink_bytes.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn add_downlink_bytes(&self, n: usize) {
        self.downlink_bytes.fetch_add(n as u64, Ordering::Relaxed);
    }

    /// When the current connection was made
    pub fn connect_at(&self) -> Option<SystemTime> {
        *self.connect_at.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn connected_now(&self) {
        self.inc_connects();
        *self.connect_at.lock().unwrap_or_else(PoisonError::into_inner) = Some(SystemTime::now());
    }

    /// Copy every counter
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            failed_connects: self.failed_connects(),
            connects: self.connects(),
            connect_at: self.connect_at(),
            rf_recv_packets: self.rf_recv_packets(),
            uplink_packets: self.uplink_packets(),
            uplink_bytes: self.uplink_bytes(),
            downlink_packets: self.downlink_packets(),
            downlink_bytes: self.downlink_bytes(),
            rf_xmit_packets: self.rf_xmit_packets(),
            msg_cnt: self.msg_cnt(),
        }
    }
}
