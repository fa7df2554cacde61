//! Node wiring
//!
//! Builds the queues and engines from [`NodeConfig`] and runs the single
//! consumer of the receive queue. Everything that changes digipeater state
//! happens on that one thread.

use std::io::BufRead;
use std::sync::Arc;
use std::thread;

use relay_core::{
    Channels, ConnectedDigipeater, DigiObserver, Digipeater, ExprFilter, Medium, PacketFilter,
    RxEvent, RxQueue, TxEntry, TxQueue,
};
use relay_igate::Igate;
use relay_packet::Packet;
use tracing::{debug, error, info, warn};

use crate::settings::NodeConfig;

/// Engines and queues of a running node
pub struct Node {
    channels: Channels,
    txq: Arc<TxQueue>,
    rxq: Arc<RxQueue>,
    digi: Digipeater,
    cdigi: ConnectedDigipeater,
    igate: Arc<Igate>,
}

impl Node {
    /// Compile the configuration into engines
    pub fn build(config: NodeConfig) -> Self {
        let channels = Channels::new(&config.channels);
        let filter: Arc<dyn PacketFilter> = Arc::new(ExprFilter);
        let txq = Arc::new(TxQueue::new(channels.media()));
        let rxq = Arc::new(RxQueue::new());

        let igate = Arc::new(Igate::new(
            config.igate,
            channels.clone(),
            Arc::clone(&filter),
            Arc::clone(&txq),
            Arc::clone(&rxq),
        ));
        let observer: Arc<dyn DigiObserver> = Arc::clone(&igate) as Arc<dyn DigiObserver>;
        let digi = Digipeater::new(channels.clone(), &config.digi, Arc::clone(&filter), Arc::clone(&txq))
            .with_observer(observer);
        let cdigi = ConnectedDigipeater::new(channels.clone(), &config.cdigi, filter, Arc::clone(&txq));

        Self {
            channels,
            txq,
            rxq,
            digi,
            cdigi,
            igate,
        }
    }

    /// Channel table
    pub fn channels(&self) -> &Channels {
        &self.channels
    }

    /// Transmit queue shared with the transmitters
    pub fn txq(&self) -> Arc<TxQueue> {
        Arc::clone(&self.txq)
    }

    /// Receive queue shared with every reader
    pub fn rxq(&self) -> Arc<RxQueue> {
        Arc::clone(&self.rxq)
    }

    /// The APRS-IS gateway
    pub fn igate(&self) -> Arc<Igate> {
        Arc::clone(&self.igate)
    }

    /// Handle one receive queue event
    pub fn dispatch(&mut self, event: RxEvent) {
        match event {
            RxEvent::RecFrame { chan, packet, .. } => self.process_frame(chan, &packet),
            RxEvent::SeizeConfirm { chan } => debug!("Channel {} seized", chan),
            RxEvent::ChannelBusy {
                chan,
                activity,
                status,
            } => debug!("Channel {} {:?} busy={}", chan, activity, status),
            other if other.is_client_request() => {
                warn!("No connected mode link layer; ignoring {:?}", other);
            }
            other => debug!("Ignoring {:?}", other),
        }
    }

    /// Offer a received frame to the gateway and both digipeaters
    pub fn process_frame(&mut self, chan: usize, packet: &Packet) {
        let medium = self.channels.medium(chan);
        if medium == Medium::None {
            error!("Received frame on unconfigured channel {}", chan);
            return;
        }

        // Frames injected from APRS-IS must not go back to it.
        if packet.is_aprs() && medium != Medium::Igate {
            self.igate.send_rf_packet(chan, packet);
        }

        self.digi.regenerate(chan, packet);

        if packet.is_aprs() {
            self.digi.digipeat(chan, packet);
        }

        if medium == Medium::Radio {
            self.cdigi.cdigipeat(chan, packet);
        }
    }
}

/// Drain the receive queue forever
pub fn run_dispatcher(mut node: Node) {
    info!("Receive queue dispatcher started");
    let rxq = node.rxq();
    loop {
        if let Some(event) = rxq.pop(None) {
            node.dispatch(event);
        }
    }
}

/// Start one transmitter thread per channel with a transmit medium.
///
/// There is no modem here; a transmitted frame is logged in monitor
/// format.
pub fn spawn_transmitters(
    channels: &Channels,
    txq: &Arc<TxQueue>,
    rxq: &Arc<RxQueue>,
) -> std::io::Result<Vec<thread::JoinHandle<()>>> {
    let mut handles = Vec::new();
    for chan in 0..channels.len() {
        if !matches!(channels.medium(chan), Medium::Radio | Medium::NetTnc) {
            continue;
        }
        let txq = Arc::clone(txq);
        let rxq = Arc::clone(rxq);
        let handle = thread::Builder::new()
            .name(format!("xmit{}", chan))
            .spawn(move || run_transmitter(chan, &txq, &rxq))?;
        handles.push(handle);
    }
    Ok(handles)
}

fn run_transmitter(chan: usize, txq: &TxQueue, rxq: &RxQueue) {
    info!("Transmitter for channel {} started", chan);
    loop {
        txq.wait_while_empty(chan);
        while let Some(entry) = txq.remove_next(chan) {
            match entry {
                TxEntry::Frame(packet) => info!("[{}] {}", chan, packet.to_text()),
                TxEntry::Seize => rxq.push(RxEvent::SeizeConfirm { chan }),
            }
        }
    }
}

/// Parse a monitor line, optionally prefixed with `<chan> `
pub fn parse_input_line(line: &str) -> Option<(usize, Packet)> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return None;
    }

    let (chan, text) = line
        .split_once(' ')
        .and_then(|(prefix, rest)| prefix.parse::<usize>().ok().map(|chan| (chan, rest)))
        .unwrap_or((0, line));

    match Packet::from_text(text, true) {
        Ok(packet) => Some((chan, packet)),
        Err(e) => {
            warn!("Could not parse input \"{}\": {}", text, e);
            None
        }
    }
}

/// Feed monitor format lines from stdin into the receive queue
pub fn spawn_stdin_reader(rxq: Arc<RxQueue>) -> std::io::Result<thread::JoinHandle<()>> {
    thread::Builder::new().name("stdin".into()).spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) => {
                    if let Some((chan, packet)) = parse_input_line(&line) {
                        rxq.push(RxEvent::frame(chan, packet));
                    }
                }
                Err(e) => {
                    error!("Error reading stdin: {}", e);
                    break;
                }
            }
        }
        info!("Input closed");
    })
}
