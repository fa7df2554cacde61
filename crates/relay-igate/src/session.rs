//! APRS-IS connection tasks
//!
//! The connect manager loops forever: wait, resolve, shuffle, connect,
//! then run a session until the socket fails. A session owns the socket
//! and multiplexes three things with `tokio::select!`:
//!
//! - bytes from the server, split into lines and handed to the [`Igate`]
//! - lines queued by [`Igate::send_to_server`] through the uplink channel
//! - login, ready and heartbeat timers
//!
//! Any read or write failure ends the session and clears the uplink slot.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{lookup_host, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{interval, interval_at, sleep, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::codec::LineDecoder;
use crate::error::IgateError;
use crate::gateway::{ConnState, Igate};

/// Most resolved addresses tried per attempt
const MAX_HOSTS: usize = 50;

/// Delays used by the connection tasks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// Wait before each connection attempt
    pub reconnect: Duration,
    /// Wait after connecting before sending the login line
    pub login: Duration,
    /// Wait after the login line before sending packets
    pub ready: Duration,
    /// Interval between `#` keepalive lines
    pub heartbeat: Duration,
    /// SATgate hold list polling interval
    pub satgate_poll: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            reconnect: Duration::from_secs(5),
            login: Duration::from_secs(3),
            ready: Duration::from_secs(7),
            heartbeat: Duration::from_secs(30),
            satgate_poll: Duration::from_secs(1),
        }
    }
}

/// Keep a server connection up for the life of the process
pub async fn run_connect_manager(igate: Arc<Igate>, timing: Timing) {
    info!(
        "IGate connection manager started for {}:{}",
        igate.config().server,
        igate.config().port
    );

    loop {
        sleep(timing.reconnect).await;

        let (stream, addr) = match connect(&igate).await {
            Ok(connected) => connected,
            Err(e) => {
                error!("{}", e);
                igate.set_state(ConnState::Disconnected);
                continue;
            }
        };

        igate.stats().connected_now();
        info!("Now connected to IGate server {} ({})", igate.config().server, addr);

        match run_session(&igate, stream, timing).await {
            Ok(()) => info!("IGate session ended"),
            Err(e) => warn!("Lost connection to IGate server: {}", e),
        }
        igate.detach();
    }
}

async fn connect(igate: &Igate) -> Result<(TcpStream, SocketAddr), IgateError> {
    let config = igate.config();
    igate.set_state(ConnState::Resolving);

    let mut hosts: Vec<SocketAddr> = lookup_host((config.server.as_str(), config.port))
        .await
        .map_err(|e| IgateError::Resolve {
            server: config.server.clone(),
            message: e.to_string(),
        })?
        .take(MAX_HOSTS)
        .collect();
    if hosts.is_empty() {
        return Err(IgateError::Resolve {
            server: config.server.clone(),
            message: "no addresses".to_string(),
        });
    }
    hosts.shuffle(&mut rand::rng());
    debug!("IGate server addresses after shuffling: {:?}", hosts);

    igate.set_state(ConnState::Connecting);
    for addr in hosts {
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                if let Err(e) = stream.set_nodelay(true) {
                    info!("setsockopt TCP_NODELAY failed: {}", e);
                }
                return Ok((stream, addr));
            }
            Err(e) => {
                info!("Connect to IGate server {} ({}) failed: {}", config.server, addr, e);
                igate.stats().inc_failed_connects();
            }
        }
    }

    Err(IgateError::Connect(config.server.clone()))
}

/// Run one server session over an established stream.
///
/// Returns when the server closes the connection or an I/O error occurs.
/// The caller is responsible for [`Igate::detach`].
pub async fn run_session<S>(igate: &Igate, stream: S, timing: Timing) -> Result<(), IgateError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut reader, mut writer) = tokio::io::split(stream);
    let (uplink_tx, mut uplink_rx) = mpsc::unbounded_channel::<Vec<u8>>();
    igate.attach(uplink_tx);

    let mut decoder = LineDecoder::new();
    let mut buffer = vec![0u8; 1024];

    let login = sleep(timing.login);
    tokio::pin!(login);
    let ready = sleep(timing.login + timing.ready);
    tokio::pin!(ready);
    let mut logged_in = false;
    let mut is_ready = false;

    let mut heartbeat = interval_at(Instant::now() + timing.heartbeat, timing.heartbeat);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            result = reader.read(&mut buffer) => {
                let n = match result {
                    Ok(0) => return Err(IgateError::Closed),
                    Ok(n) => n,
                    Err(e) => {
                        error!("Error reading from IGate server.  Closing connection.");
                        return Err(e.into());
                    }
                };
                igate.stats().add_downlink_bytes(n);
                decoder.push_bytes(&buffer[..n]);
                while let Some(line) = decoder.next_line() {
                    igate.handle_server_line(&line);
                }
            }

            line = uplink_rx.recv() => {
                let Some(line) = line else {
                    return Err(IgateError::NotConnected);
                };
                if let Err(e) = writer.write_all(&line).await {
                    error!("Error sending to IGate server.  Closing connection.");
                    return Err(e.into());
                }
            }

            _ = &mut login, if !logged_in => {
                logged_in = true;
                igate.send_to_server(igate.config().login_line().as_bytes());
            }

            _ = &mut ready, if !is_ready => {
                is_ready = true;
                igate.login_complete();
            }

            _ = heartbeat.tick(), if is_ready => {
                igate.send_to_server(b"#");
            }
        }
    }
}

/// Release SATgate held packets as their delay passes
pub async fn run_satgate_ticker(igate: Arc<Igate>, period: Duration) {
    info!("SATgate delay task started");

    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        let released = igate.release_due_at(std::time::Instant::now());
        if released > 0 {
            debug!("SATgate released {} packets", released);
        }
    }
}
