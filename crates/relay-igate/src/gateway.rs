//! IGate gateway
//!
//! [`Igate`] holds everything the two directions of gating share: the
//! uplink slot, duplicate and rate histories, the message sender allowance
//! table and the SATgate hold list. It is called from the protocol thread
//! (RF to Internet), the session task (Internet to RF) and the digipeater,
//! so each table sits behind its own lock.
//!
//! The uplink slot holds the sender half of the channel feeding the current
//! server session. Clearing it is how any party marks the connection dead;
//! everyone else simply finds it empty and drops what they had.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use relay_core::{
    Channels, DigiObserver, History, Medium, PacketFilter, Priority, RxEvent, RxQueue, TxQueue,
    IGATE_CHANNEL,
};
use relay_packet::{dedupe_crc, escape_nul, Packet};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info, trace, warn};

use crate::codec::{encode_line, MAX_LINE_LEN};
use crate::config::IgateConfig;
use crate::message::{is_message_message, is_position, source_of};
use crate::stats::IgateStats;

/// Slots in the Internet to RF history
pub const TX_HISTORY_SIZE: usize = 50;
/// Slots in the RF to Internet history
pub const RX_HISTORY_SIZE: usize = 30;

/// Same packet to the same channel within this window is a duplicate
const TX_DEDUPE_WINDOW: Duration = Duration::from_secs(60);
const ONE_MINUTE: Duration = Duration::from_secs(60);
const FIVE_MINUTES: Duration = Duration::from_secs(300);
/// Messages get this many times the normal rate allowance
const MESSAGE_LIMIT_MULTIPLIER: u32 = 3;

/// Vias that keep a heard packet off the Internet
const RF_REJECT_VIAS: [&str; 4] = ["TCPIP", "TCPXX", "RFONLY", "NOGATE"];
/// Vias that keep a server packet off the air
const IS_REJECT_VIAS: [&str; 4] = ["qAX", "TCPXX", "RFONLY", "NOGATE"];

/// Spectrum label on frames injected from the server
pub const ICHANNEL_SPECTRUM: &str = "APRS-IS";

/// Server connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnState {
    /// No socket; waiting to retry
    #[default]
    Disconnected,
    /// Looking up the server name
    Resolving,
    /// Trying resolved addresses
    Connecting,
    /// Connected; login not yet accepted
    LoginPending,
    /// Packets may be sent
    Ready,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TxTag {
    chan: usize,
    by_digi: bool,
}

#[derive(Debug)]
struct Delayed {
    release: Instant,
    chan: usize,
    packet: Packet,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// APRS-IS gateway state shared by every task
pub struct Igate {
    config: IgateConfig,
    channels: Channels,
    filter: Arc<dyn PacketFilter>,
    txq: Arc<TxQueue>,
    rxq: Arc<RxQueue>,
    stats: IgateStats,
    state: Mutex<ConnState>,
    uplink: Mutex<Option<UnboundedSender<Vec<u8>>>>,
    rx_history: Mutex<History<()>>,
    tx_history: Mutex<History<TxTag>>,
    msp: Mutex<HashMap<Vec<u8>, u32>>,
    satgate: Mutex<VecDeque<Delayed>>,
}

impl Igate {
    /// Create the gateway. Nothing touches the network until
    /// [`igate_start`](crate::igate_start).
    pub fn new(
        config: IgateConfig,
        channels: Channels,
        filter: Arc<dyn PacketFilter>,
        txq: Arc<TxQueue>,
        rxq: Arc<RxQueue>,
    ) -> Self {
        let config = config.validated();
        if let Some(chan) = config.tx_chan {
            if channels.mycall(chan).is_none() {
                warn!("IGate transmit channel {} has no MYCALL; nothing will be gated to RF", chan);
            }
        }
        Self {
            config,
            channels,
            filter,
            txq,
            rxq,
            stats: IgateStats::default(),
            state: Mutex::new(ConnState::Disconnected),
            uplink: Mutex::new(None),
            rx_history: Mutex::new(History::with_capacity(RX_HISTORY_SIZE)),
            tx_history: Mutex::new(History::with_capacity(TX_HISTORY_SIZE)),
            msp: Mutex::new(HashMap::new()),
            satgate: Mutex::new(VecDeque::new()),
        }
    }

    /// Settings after range checks
    pub fn config(&self) -> &IgateConfig {
        &self.config
    }

    /// Traffic counters
    pub fn stats(&self) -> &IgateStats {
        &self.stats
    }

    /// Current connection state
    pub fn state(&self) -> ConnState {
        *lock(&self.state)
    }

    pub(crate) fn set_state(&self, state: ConnState) {
        let mut current = lock(&self.state);
        if *current != state {
            debug!("IGate connection {:?} -> {:?}", *current, state);
            *current = state;
        }
    }

    /// Logged in with a live uplink
    pub fn is_ready(&self) -> bool {
        let ready = self.state() == ConnState::Ready;
        ready && lock(&self.uplink).is_some()
    }

    /// Install the sender feeding a new server session
    pub fn attach(&self, uplink: UnboundedSender<Vec<u8>>) {
        *lock(&self.uplink) = Some(uplink);
        self.set_state(ConnState::LoginPending);
    }

    /// Login grace period is over; start sending packets
    pub fn login_complete(&self) {
        if lock(&self.uplink).is_some() {
            self.set_state(ConnState::Ready);
        }
    }

    /// Mark the connection dead
    pub fn detach(&self) {
        *lock(&self.uplink) = None;
        self.set_state(ConnState::Disconnected);
    }

    /// Station call for lines gated from `chan`
    fn igate_call(&self, chan: usize) -> String {
        self.channels
            .mycall(chan)
            .map(|a| a.with_ssid())
            .unwrap_or_else(|| self.config.login.clone())
    }

    /// Send one line to the server, CR LF added.
    ///
    /// Silently dropped when not connected. A dead session clears the
    /// uplink slot.
    pub fn send_to_server(&self, text: &[u8]) {
        let mut uplink = lock(&self.uplink);
        let Some(tx) = uplink.as_ref() else {
            trace!("IGate not connected, dropping {} bytes", text.len());
            return;
        };

        let line = encode_line(text);
        let len = line.len();
        if tx.send(line).is_err() {
            error!("Error sending to IGate server.  Closing connection.");
            *uplink = None;
            return;
        }
        self.stats.add_uplink_bytes(len);

        if text == b"#" {
            trace!("[ig] heartbeat");
        } else {
            info!("[ig] {}", String::from_utf8_lossy(text));
        }
    }

    /// Offer a frame heard on `chan` to the Internet
    pub fn send_rf_packet(&self, chan: usize, packet: &Packet) {
        self.send_rf_packet_at(chan, packet, Instant::now());
    }

    /// [`send_rf_packet`](Self::send_rf_packet) at a given time
    pub fn send_rf_packet_at(&self, chan: usize, packet: &Packet, now: Instant) {
        if !self.is_ready() {
            return;
        }
        self.stats.inc_rf_recv_packets();

        if self.channels.medium(chan) == Medium::Radio {
            if let Some(expr) = self.config.rf_filters.get(&chan) {
                if !self.filter.allow(chan, IGATE_CHANNEL, expr, packet) {
                    debug!("Packet from channel {} to IGate was rejected by filter: {}", chan, expr);
                    return;
                }
            }
        }

        let mut pp = packet.clone();
        while pp.is_third_party() {
            if let Some(via) = rf_reject_via(&pp) {
                debug!("Rx IGate: Do not relay with {} in path.", via);
                return;
            }
            pp = match pp.unwrap_third_party() {
                Ok(inner) => inner,
                Err(e) => {
                    debug!("Rx IGate: Could not unwrap third party packet: {}", e);
                    return;
                }
            };
        }

        if let Some(via) = rf_reject_via(&pp) {
            debug!("Rx IGate: Do not relay with {} in path.", via);
            return;
        }

        if pp.dti() == Some(b'?') {
            debug!("Rx IGate: Do not relay generic query.");
            return;
        }

        if pp.cut_at_crlf() > 0 {
            debug!("Rx IGate: Truncated information part at CR.");
        }

        if pp.info().is_empty() {
            debug!("Rx IGate: Information part is empty.");
            return;
        }

        if let Some(delay) = self.config.satgate_delay() {
            if pp.heard().is_none() && pp.num_repeaters() > 0 {
                info!("Rx IGate: SATgate mode, delay packet heard directly.");
                lock(&self.satgate).push_back(Delayed {
                    release: now + delay,
                    chan,
                    packet: pp,
                });
                return;
            }
        }

        self.send_packet_to_server_at(chan, &pp, now);
    }

    fn send_packet_to_server_at(&self, chan: usize, packet: &Packet, now: Instant) {
        if !self.rx_to_ig_allow_at(packet, now) {
            debug!("Rx IGate: Drop duplicate of same packet seen recently.");
            return;
        }

        let addrs = packet.format_addrs();
        let header = addrs.strip_suffix(':').unwrap_or(&addrs);
        let q = if self.config.tx_chan.is_some() { "qAR" } else { "qAO" };
        let mut msg = format!("{},{},{}:", header, q, self.igate_call(chan)).into_bytes();

        let room = (MAX_LINE_LEN - 2).saturating_sub(msg.len());
        let (info, truncated) = escape_nul_within(packet.info(), room);
        if truncated {
            error!("Rx IGate: Too long. Truncating.");
        }
        msg.extend_from_slice(&info);

        self.send_to_server(&msg);
        self.stats.inc_uplink_packets();
        self.rx_to_ig_remember_at(packet, now);
    }

    fn rx_to_ig_allow_at(&self, packet: &Packet, now: Instant) -> bool {
        let Some(window) = self.config.rx2ig_dedupe() else {
            return true;
        };
        !lock(&self.rx_history).seen_within_at(dedupe_crc(packet), window, now, |_| true)
    }

    fn rx_to_ig_remember_at(&self, packet: &Packet, now: Instant) {
        if self.config.rx2ig_dedupe().is_some() {
            lock(&self.rx_history).remember_at(dedupe_crc(packet), (), now);
        }
    }

    /// Packets waiting out the SATgate delay
    pub fn satgate_pending(&self) -> usize {
        lock(&self.satgate).len()
    }

    /// Send every held packet whose delay has passed. Returns how many.
    pub fn release_due_at(&self, now: Instant) -> usize {
        let due: Vec<Delayed> = {
            let mut list = lock(&self.satgate);
            let mut due = Vec::new();
            while list.front().is_some_and(|d| now >= d.release) {
                if let Some(d) = list.pop_front() {
                    due.push(d);
                }
            }
            due
        };

        let released = due.len();
        for d in due {
            self.send_packet_to_server_at(d.chan, &d.packet, now);
        }
        released
    }

    /// Handle one line from the server, terminator already removed
    pub fn handle_server_line(&self, line: &[u8]) {
        self.handle_server_line_at(line, Instant::now());
    }

    /// [`handle_server_line`](Self::handle_server_line) at a given time
    pub fn handle_server_line_at(&self, line: &[u8], now: Instant) {
        if line.is_empty() {
            return;
        }

        if line[0] == b'#' {
            if self.state() != ConnState::Ready {
                info!("[ig] {}", String::from_utf8_lossy(line));
            }
            return;
        }

        info!("[ig>tx] {}", String::from_utf8_lossy(line));
        self.stats.inc_downlink_packets();

        if let Some(to_chan) = self.config.tx_chan {
            self.maybe_xmit_at(line, to_chan, now);
        }

        if let Some(ichan) = self.config.ichannel {
            let mut text = b"X>X:}".to_vec();
            text.extend_from_slice(line);
            match Packet::from_text(&text, false) {
                Ok(packet) => self.rxq.push(RxEvent::RecFrame {
                    chan: ichan,
                    subchan: 0,
                    slice: 0,
                    packet,
                    spectrum: ICHANNEL_SPECTRUM.to_string(),
                }),
                Err(e) => error!(
                    "ICHANNEL {}: Could not parse message from APRS-IS server: {}",
                    ichan, e
                ),
            }
        }
    }

    /// Gate a server line to radio channel `to_chan` if the rules allow
    pub fn maybe_xmit_at(&self, line: &[u8], to_chan: usize, now: Instant) {
        let pp3 = match Packet::from_text(line, false) {
            Ok(p) => p,
            Err(e) => {
                warn!("Tx IGate: Could not parse message from server: {}", e);
                return;
            }
        };
        let Some(src) = source_of(line) else {
            return;
        };

        if let Some(via) = pp3.repeaters().iter().map(|a| a.with_ssid()).find(|v| {
            IS_REJECT_VIAS
                .iter()
                .any(|r| v.eq_ignore_ascii_case(r))
        }) {
            debug!("Tx IGate: Do not transmit with {} in path.", via);
            return;
        }

        let bypass = is_position(pp3.info()) && self.take_msp(src);
        if !bypass {
            if let Some(expr) = self.config.is_filters.get(&to_chan) {
                if !self.filter.allow(IGATE_CHANNEL, to_chan, expr, &pp3) {
                    debug!("Tx IGate: Packet rejected by filter for channel {}: {}", to_chan, expr);
                    return;
                }
            }
        }

        let Some(mycall) = self.channels.mycall(to_chan) else {
            error!("Tx IGate: Channel {} has no MYCALL.", to_chan);
            return;
        };

        if !self.ig_to_tx_allow_at(&pp3, to_chan, now) {
            return;
        }

        let mut radio = format!(
            "{}>{}{}:}}{}>{},TCPIP,{}*:",
            mycall.with_ssid(),
            self.config.tocall(),
            self.config.via_suffix(),
            String::from_utf8_lossy(src),
            pp3.destination().with_ssid(),
            mycall.with_ssid(),
        )
        .into_bytes();
        radio.extend_from_slice(&escape_nul(pp3.info()));

        let frame = match Packet::from_text(&radio, true) {
            Ok(frame) => frame,
            Err(e) => {
                error!("Received invalid packet from IGate: {}", e);
                return;
            }
        };

        if let Err(e) = self.txq.append(to_chan, Priority::Low, frame) {
            warn!("Tx IGate: {}", e);
            return;
        }
        self.stats.inc_rf_xmit_packets();

        if is_message_message(pp3.info()) {
            self.stats.inc_msg_cnt();
            if self.config.igmsp > 0 {
                lock(&self.msp).insert(src.to_vec(), self.config.igmsp);
            }
        }

        self.ig_to_tx_remember_at(&pp3, to_chan, false, now);
    }

    /// Use one unfiltered position allowance for `src`
    fn take_msp(&self, src: &[u8]) -> bool {
        let mut msp = lock(&self.msp);
        let Some(n) = msp.get_mut(src).filter(|n| **n > 0) else {
            return false;
        };
        *n -= 1;
        let left = *n;
        if left == 0 {
            msp.remove(src);
        }
        debug!(
            "Tx IGate: Allowing position from {} after message, {} left",
            String::from_utf8_lossy(src),
            left
        );
        true
    }

    /// Unfiltered positions still allowed for `src`
    pub fn msp_remaining(&self, src: &str) -> u32 {
        lock(&self.msp).get(src.as_bytes()).copied().unwrap_or(0)
    }

    /// Duplicate and rate check for traffic gated to `chan`
    pub fn ig_to_tx_allow_at(&self, packet: &Packet, chan: usize, now: Instant) -> bool {
        let crc = dedupe_crc(packet);
        let is_msg = is_message_message(packet.info());
        let history = lock(&self.tx_history);

        if !is_msg && history.seen_within_at(crc, TX_DEDUPE_WINDOW, now, |t| t.chan == chan) {
            info!("Tx IGate: Drop duplicate packet transmitted recently.");
            return false;
        }

        let ours = |e: &relay_core::HistoryEntry<TxTag>| e.tag.chan == chan && !e.tag.by_digi;
        let count_1 = history.count_within_at(ONE_MINUTE, now, ours);
        let count_5 = history.count_within_at(FIVE_MINUTES, now, ours);

        let mult = if is_msg { MESSAGE_LIMIT_MULTIPLIER } else { 1 };
        let limit_1 = self.config.tx_limit_1 * mult;
        let limit_5 = self.config.tx_limit_5 * mult;

        if count_1 >= limit_1 as usize {
            error!("Tx IGate: Already transmitted maximum of {} packets in 1 minute.", limit_1);
            return false;
        }
        if count_5 >= limit_5 as usize {
            error!("Tx IGate: Already transmitted maximum of {} packets in 5 minutes.", limit_5);
            return false;
        }
        true
    }

    /// Record a transmission on `chan`. `by_digi` marks digipeated frames,
    /// which count for duplicates but not against the rate limits.
    pub fn ig_to_tx_remember(&self, packet: &Packet, chan: usize, by_digi: bool) {
        self.ig_to_tx_remember_at(packet, chan, by_digi, Instant::now());
    }

    /// [`ig_to_tx_remember`](Self::ig_to_tx_remember) at a given time
    pub fn ig_to_tx_remember_at(&self, packet: &Packet, chan: usize, by_digi: bool, now: Instant) {
        lock(&self.tx_history).remember_at(dedupe_crc(packet), TxTag { chan, by_digi }, now);
    }
}

impl DigiObserver for Igate {
    fn digipeated(&self, packet: &Packet, to_chan: usize) {
        self.ig_to_tx_remember(packet, to_chan, true);
    }
}

/// Escape NULs in `info`, keeping at most `room` bytes without splitting
/// an escape. Also reports whether anything was cut.
fn escape_nul_within(info: &[u8], room: usize) -> (Vec<u8>, bool) {
    let mut out = Vec::with_capacity(info.len().min(room));
    for b in info {
        let escaped: &[u8] = if *b == 0 { b"<0x00>" } else { std::slice::from_ref(b) };
        if out.len() + escaped.len() > room {
            return (out, true);
        }
        out.extend_from_slice(escaped);
    }
    (out, false)
}

fn rf_reject_via(packet: &Packet) -> Option<String> {
    packet
        .repeaters()
        .iter()
        .map(|a| a.with_ssid())
        .find(|v| RF_REJECT_VIAS.contains(&v.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::{AcceptAll, ChannelConfig};
    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

    fn igate(config: IgateConfig) -> (Igate, Arc<TxQueue>, UnboundedReceiver<Vec<u8>>) {
        let channels = Channels::new(&[ChannelConfig::radio("WB2OSZ-5")]);
        let txq = Arc::new(TxQueue::new(channels.media()));
        let ig = Igate::new(
            config,
            channels,
            Arc::new(AcceptAll),
            Arc::clone(&txq),
            Arc::new(RxQueue::new()),
        );
        let (tx, rx) = unbounded_channel();
        ig.attach(tx);
        ig.login_complete();
        (ig, txq, rx)
    }

    fn pkt(s: &str) -> Packet {
        Packet::from_text(s, true).unwrap()
    }

    #[test]
    fn test_state_transitions() {
        let (ig, _, rx) = igate(IgateConfig::default());
        assert_eq!(ig.state(), ConnState::Ready);
        assert!(ig.is_ready());
        drop(rx);
        ig.send_to_server(b"#");
        assert!(!ig.is_ready());
        ig.detach();
        assert_eq!(ig.state(), ConnState::Disconnected);
    }

    #[test]
    fn test_login_complete_needs_uplink() {
        let channels = Channels::new(&[]);
        let ig = Igate::new(
            IgateConfig::default(),
            channels,
            Arc::new(AcceptAll),
            Arc::new(TxQueue::new(Vec::new())),
            Arc::new(RxQueue::new()),
        );
        ig.login_complete();
        assert_eq!(ig.state(), ConnState::Disconnected);
    }

    #[test]
    fn test_rf_to_is_qar() {
        let config = IgateConfig {
            tx_chan: Some(0),
            ..Default::default()
        };
        let (ig, _, mut rx) = igate(config);
        ig.send_rf_packet(0, &pkt("W1ABC>APRS,WIDE1-1:>status"));
        assert_eq!(
            rx.try_recv().unwrap(),
            b"W1ABC>APRS,WIDE1-1,qAR,WB2OSZ-5:>status\r\n".to_vec()
        );
        assert_eq!(ig.stats().uplink_packets(), 1);
        assert_eq!(ig.stats().rf_recv_packets(), 1);
    }

    #[test]
    fn test_rx_only_uses_qao() {
        let (ig, _, mut rx) = igate(IgateConfig::default());
        ig.send_rf_packet(0, &pkt("W1ABC>APRS:>status"));
        assert_eq!(
            rx.try_recv().unwrap(),
            b"W1ABC>APRS,qAO,WB2OSZ-5:>status\r\n".to_vec()
        );
    }

    #[test]
    fn test_not_ready_drops() {
        let (ig, _, mut rx) = igate(IgateConfig::default());
        ig.set_state(ConnState::LoginPending);
        ig.send_rf_packet(0, &pkt("W1ABC>APRS:>status"));
        assert!(rx.try_recv().is_err());
        assert_eq!(ig.stats().rf_recv_packets(), 0);
    }

    #[test]
    fn test_msp_allowance() {
        let config = IgateConfig {
            tx_chan: Some(0),
            igmsp: 2,
            ..Default::default()
        };
        let (ig, _, _rx) = igate(config);
        ig.maybe_xmit_at(b"W1XYZ>APRS,TCPIP*:>status", 0, Instant::now());
        assert_eq!(ig.msp_remaining("W1XYZ"), 0);

        ig.maybe_xmit_at(b"W1XYZ>APRS,TCPIP*::WB2OSZ-9 :hi{1", 0, Instant::now());
        assert_eq!(ig.msp_remaining("W1XYZ"), 2);
        assert!(ig.take_msp(b"W1XYZ"));
        assert_eq!(ig.msp_remaining("W1XYZ"), 1);
        assert!(ig.take_msp(b"W1XYZ"));
        assert!(lock(&ig.msp).is_empty());
        assert!(!ig.take_msp(b"W1XYZ"));
    }

    #[test]
    fn test_escape_nul_within_keeps_escapes_whole() {
        assert_eq!(escape_nul_within(b"ab\0c", 20), (b"ab<0x00>c".to_vec(), false));
        assert_eq!(escape_nul_within(b"ab\0c", 5), (b"ab".to_vec(), true));
        assert_eq!(escape_nul_within(b"ab\0c", 8), (b"ab<0x00>".to_vec(), true));
        assert_eq!(escape_nul_within(b"abc", 3), (b"abc".to_vec(), false));
    }

    #[test]
    fn test_long_packet_truncated_on_escape_boundary() {
        let (ig, _, mut rx) = igate(IgateConfig::default());
        let header = "W1ABC>APRS,qAO,WB2OSZ-5:";
        let mut info = vec![b'>'];
        info.resize(510 - header.len() - 3, b'y');
        info.extend_from_slice(&[0, 0]);
        let mut packet = pkt("W1ABC>APRS:>x");
        packet.set_info(info);
        ig.send_rf_packet(0, &packet);

        let line = rx.try_recv().unwrap();
        let text = &line[..line.len() - 2];
        assert!(text.len() <= 510);
        assert!(text.ends_with(b"y"));
        assert!(!text.contains(&b'<'));
    }
}
