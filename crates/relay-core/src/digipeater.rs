//! APRS digipeater
//!
//! Decides, for every frame heard on a channel, which channels should
//! repeat it and what the repeated path looks like. Rules are configured
//! per (from, to) channel pair.
//!
//! The received frame is never modified. Each match works on a clone so
//! one frame can fan out to several channels.
//!
//! Same channel repeats go on the high priority transmit list so every
//! digipeater in range keys up at once and the packet clears the area in
//! one slot. Cross channel repeats go on the low priority list.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use regex::Regex;
use relay_packet::{dedupe_crc, Address, Packet, PacketError, MAX_REPEATERS};
use tracing::{debug, error, info, warn};

use crate::config::{compile_pattern, Channels, DigiConfig, DigiRuleConfig, Medium, Preempt, RuleMatrix};
use crate::filter::PacketFilter;
use crate::history::History;
use crate::txq::{Priority, TxQueue};

/// Slots in the duplicate history
pub const DEDUPE_HISTORY_SIZE: usize = 25;

/// Notified of every frame the digipeater queues.
///
/// The IGate uses this so frames we digipeated are not gated back onto
/// the same channel from the Internet.
pub trait DigiObserver: Send + Sync {
    /// `packet` is the frame as received
    fn digipeated(&self, packet: &Packet, to_chan: usize);
}

/// Compiled rule for one channel pair
#[derive(Debug, Clone)]
struct DigiRule {
    alias: Option<Regex>,
    wide: Option<Regex>,
    preempt: Preempt,
    atgp: String,
    filter: Option<String>,
    enabled: bool,
    regen: bool,
}

impl DigiRule {
    fn compile(cfg: &DigiRuleConfig) -> Self {
        let mut enabled = cfg.enabled;
        let alias = compile_pattern(&cfg.alias).unwrap_or_else(|e| {
            error!("Digipeater rule {} to {} disabled: {}", cfg.from, cfg.to, e);
            enabled = false;
            None
        });
        let wide = compile_pattern(&cfg.wide).unwrap_or_else(|e| {
            error!("Digipeater rule {} to {} disabled: {}", cfg.from, cfg.to, e);
            enabled = false;
            None
        });

        match cfg.preempt {
            Preempt::Drop | Preempt::Mark => warn!(
                "Channel {} to {}: preempt {:?} will be removed in a future release. Use trace.",
                cfg.from, cfg.to, cfg.preempt
            ),
            Preempt::Off | Preempt::Trace => {}
        }

        Self {
            alias,
            wide,
            preempt: cfg.preempt,
            atgp: cfg.atgp.clone(),
            filter: cfg.filter.clone(),
            enabled,
            regen: cfg.regen,
        }
    }

    fn alias_matches(&self, addr: &str) -> bool {
        self.alias.as_ref().is_some_and(|re| re.is_match(addr))
    }

    fn wide_matches(&self, addr: &str) -> bool {
        self.wide.as_ref().is_some_and(|re| re.is_match(addr))
    }

    fn is_atgp(&self, call: &str) -> bool {
        !self.atgp.is_empty()
            && call.len() >= self.atgp.len()
            && call.as_bytes()[..self.atgp.len()].eq_ignore_ascii_case(self.atgp.as_bytes())
    }
}

/// APRS digipeater engine
pub struct Digipeater {
    channels: Channels,
    rules: RuleMatrix<DigiRule>,
    history: History<usize>,
    dedupe_window: Duration,
    filter: Arc<dyn PacketFilter>,
    txq: Arc<TxQueue>,
    observer: Option<Arc<dyn DigiObserver>>,
    counts: HashMap<(usize, usize), u64>,
}

impl Digipeater {
    /// Compile the rules. A rule with a bad pattern is logged and disabled;
    /// the others still work.
    pub fn new(
        channels: Channels,
        config: &DigiConfig,
        filter: Arc<dyn PacketFilter>,
        txq: Arc<TxQueue>,
    ) -> Self {
        let mut rules = RuleMatrix::new();
        for cfg in &config.rules {
            let mut rule = DigiRule::compile(cfg);
            if rule.enabled && (channels.mycall(cfg.from).is_none() || channels.mycall(cfg.to).is_none()) {
                error!(
                    "Digipeater rule {} to {} disabled: both channels need MYCALL",
                    cfg.from, cfg.to
                );
                rule.enabled = false;
            }
            if rule.enabled {
                info!("Digipeating from channel {} to {}", cfg.from, cfg.to);
            }
            rules.insert(cfg.from, cfg.to, rule);
        }

        Self {
            channels,
            rules,
            history: History::with_capacity(DEDUPE_HISTORY_SIZE),
            dedupe_window: Duration::from_secs(config.dedupe_time_secs),
            filter,
            txq,
            observer: None,
            counts: HashMap::new(),
        }
    }

    /// Report every queued frame to `observer`
    pub fn with_observer(mut self, observer: Arc<dyn DigiObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Channel table
    pub fn channels(&self) -> &Channels {
        &self.channels
    }

    /// Frames digipeated from one channel to another so far
    pub fn count(&self, from_chan: usize, to_chan: usize) -> u64 {
        self.counts.get(&(from_chan, to_chan)).copied().unwrap_or(0)
    }

    /// Offer a received frame to every enabled rule leaving `from_chan`
    pub fn digipeat(&mut self, from_chan: usize, packet: &Packet) {
        self.digipeat_at(from_chan, packet, Instant::now());
    }

    /// [`digipeat`](Self::digipeat) with an explicit clock
    pub fn digipeat_at(&mut self, from_chan: usize, packet: &Packet, now: Instant) {
        match self.channels.medium(from_chan) {
            Medium::Radio | Medium::NetTnc | Medium::Igate => {}
            Medium::None => {
                error!(
                    "APRS digipeater: Did not expect to receive on invalid channel {}.",
                    from_chan
                );
                return;
            }
        }

        let targets: Vec<usize> = self
            .rules
            .from_channel(from_chan)
            .filter(|(_, rule)| rule.enabled)
            .map(|(to, _)| to)
            .collect();

        let same = targets.iter().copied().filter(|&to| to == from_chan);
        let cross = targets.iter().copied().filter(|&to| to != from_chan);
        let passes = same
            .map(|to| (to, Priority::High))
            .chain(cross.map(|to| (to, Priority::Low)));

        for (to_chan, prio) in passes.collect::<Vec<_>>() {
            if let Some(result) = self.digipeat_match_at(from_chan, to_chan, packet, now) {
                self.remember_at(packet, to_chan, now);
                if let Err(e) = self.txq.append(to_chan, prio, result) {
                    debug!("Digipeat to channel {} not queued: {}", to_chan, e);
                    continue;
                }
                *self.counts.entry((from_chan, to_chan)).or_insert(0) += 1;
            }
        }
    }

    /// Record a digipeated frame for duplicate suppression
    pub fn remember_at(&mut self, packet: &Packet, to_chan: usize, now: Instant) {
        self.history.remember_at(dedupe_crc(packet), to_chan, now);
        if let Some(observer) = &self.observer {
            observer.digipeated(packet, to_chan);
        }
    }

    /// Was an identical frame sent to `to_chan` within the window
    pub fn is_duplicate_at(&self, packet: &Packet, to_chan: usize, now: Instant) -> bool {
        self.history
            .seen_within_at(dedupe_crc(packet), self.dedupe_window, now, |&c| c == to_chan)
    }

    /// Retransmit a received frame unmodified on every channel with
    /// regeneration enabled
    pub fn regenerate(&self, from_chan: usize, packet: &Packet) {
        for (to_chan, rule) in self.rules.from_channel(from_chan) {
            if rule.regen {
                if let Err(e) = self.txq.append(to_chan, Priority::Low, packet.clone()) {
                    debug!("Regenerated frame for channel {} not queued: {}", to_chan, e);
                }
            }
        }
    }

    /// Decide whether the rule for (`from_chan`, `to_chan`) repeats
    /// `packet`, and build the frame to send.
    ///
    /// Does not update the duplicate history.
    pub fn digipeat_match(&self, from_chan: usize, to_chan: usize, packet: &Packet) -> Option<Packet> {
        self.digipeat_match_at(from_chan, to_chan, packet, Instant::now())
    }

    /// [`digipeat_match`](Self::digipeat_match) with an explicit clock
    pub fn digipeat_match_at(
        &self,
        from_chan: usize,
        to_chan: usize,
        packet: &Packet,
        now: Instant,
    ) -> Option<Packet> {
        let rule = self.rules.get(from_chan, to_chan).filter(|r| r.enabled)?;
        let mycall_rec = self.channels.mycall(from_chan)?;
        let mycall_xmit = self.channels.mycall(to_chan)?;

        if let Some(expr) = &rule.filter {
            if !self.filter.allow(from_chan, to_chan, expr, packet) {
                debug!(
                    "Packet was rejected for digipeating from channel {} to {} by filter: {}",
                    from_chan, to_chan, expr
                );
                return None;
            }
        }

        let r = packet.first_not_repeated()?;
        let repeater = packet.repeater(r)?;
        let repeater_text = repeater.with_ssid();
        let ssid = repeater.ssid();

        // Explicit use of our call skips the loop and duplicate checks.
        if repeater.same_station(mycall_rec) {
            return checked(substitute(packet, r, mycall_xmit));
        }

        if packet.source().same_station(mycall_rec) {
            return None;
        }

        if self.is_duplicate_at(packet, to_chan, now) {
            info!("Digipeater: Drop redundant packet to channel {}.", to_chan);
            return None;
        }

        if rule.alias_matches(&repeater_text) {
            return checked(substitute(packet, r, mycall_xmit));
        }

        if rule.preempt != Preempt::Off {
            let later = (r + 1..packet.num_repeaters()).find(|&r2| {
                packet.repeater(r2).is_some_and(|a| {
                    a.same_station(mycall_rec) || rule.alias_matches(&a.with_ssid())
                })
            });
            if let Some(r2) = later {
                return checked(preempt(packet, r2, mycall_xmit, rule.preempt));
            }
        }

        if !rule.wide_matches(&repeater_text) {
            return None;
        }

        if rule.is_atgp(repeater.call()) && (1..=7).contains(&ssid) {
            return checked(compact_path(packet, r, ssid, mycall_xmit));
        }

        match ssid {
            1 => checked(substitute(packet, r, mycall_xmit)),
            2..=7 => checked(decrement(packet, r, ssid, mycall_xmit)),
            _ => None,
        }
    }
}

fn checked(result: Result<Packet, PacketError>) -> Option<Packet> {
    result
        .map_err(|e| error!("Digipeater path rewrite failed: {}", e))
        .ok()
}

fn used(call: &Address) -> Address {
    let mut addr = call.clone();
    addr.set_heard(true);
    addr
}

/// Put our call in slot `r` and mark it used
fn substitute(packet: &Packet, r: usize, mycall: &Address) -> Result<Packet, PacketError> {
    let mut result = packet.clone();
    result.set_repeater(r, used(mycall))?;
    Ok(result)
}

/// WIDEn-N with N of 2 or more: count down and trace our call in front if
/// the path has room
fn decrement(packet: &Packet, r: usize, ssid: u8, mycall: &Address) -> Result<Packet, PacketError> {
    let mut result = packet.clone();
    result.set_repeater_ssid(r, ssid - 1)?;
    if packet.num_repeaters() < MAX_REPEATERS {
        result.insert_repeater(r, used(mycall))?;
    }
    Ok(result)
}

/// Our call or alias found past the first unused slot
fn preempt(packet: &Packet, mut r2: usize, mycall: &Address, mode: Preempt) -> Result<Packet, PacketError> {
    let mut result = packet.clone();
    result.set_repeater(r2, used(mycall))?;

    match mode {
        Preempt::Drop => {
            while r2 > 0 {
                result.remove_repeater(r2 - 1)?;
                r2 -= 1;
            }
        }
        Preempt::Mark => {
            while r2 > 0 && !result.is_used(r2 - 1) {
                result.set_used(r2 - 1)?;
                r2 -= 1;
            }
        }
        Preempt::Trace | Preempt::Off => {
            while r2 > 0 && !result.is_used(r2 - 1) {
                result.remove_repeater(r2 - 1)?;
                r2 -= 1;
            }
        }
    }
    Ok(result)
}

/// Hop-limited path that must not grow: drop the used slots in front,
/// count down, and put our call first.
///
/// The slot counted down to zero stays in place marked used; the next
/// digipeater removes it.
fn compact_path(packet: &Packet, mut r: usize, ssid: u8, mycall: &Address) -> Result<Packet, PacketError> {
    let mut result = packet.clone();
    while result.num_repeaters() >= 1 && result.is_used(0) {
        result.remove_repeater(0)?;
        r -= 1;
    }

    let ssid = ssid - 1;
    result.set_repeater_ssid(r, ssid)?;
    if ssid == 0 {
        result.set_used(r)?;
    }
    if result.num_repeaters() < MAX_REPEATERS {
        result.insert_repeater(0, used(mycall))?;
    } else {
        // No room for our call; the first slot still gets marked used.
        result.set_used(0)?;
    }
    Ok(result)
}
