//! Connected mode digipeater
//!
//! A much simpler relative of the APRS digipeater. Only an explicit use of
//! our call, or an optional alias, in the first unused slot gets repeated.
//! There is no duplicate suppression and no WIDEn-N handling because the
//! link layer retries on its own.

use std::collections::HashMap;
use std::sync::Arc;

use regex::Regex;
use relay_packet::Packet;
use tracing::{debug, error, info};

use crate::config::{compile_pattern, CdigiConfig, Channels, Medium, RuleMatrix};
use crate::filter::PacketFilter;
use crate::txq::{Priority, TxQueue};

#[derive(Debug, Clone)]
struct CdigiRule {
    alias: Option<Regex>,
    filter: Option<String>,
    enabled: bool,
}

/// Connected mode digipeater engine
pub struct ConnectedDigipeater {
    channels: Channels,
    rules: RuleMatrix<CdigiRule>,
    filter: Arc<dyn PacketFilter>,
    txq: Arc<TxQueue>,
    counts: HashMap<(usize, usize), u64>,
}

impl ConnectedDigipeater {
    /// Compile the rules; a bad alias disables only its own rule
    pub fn new(
        channels: Channels,
        config: &CdigiConfig,
        filter: Arc<dyn PacketFilter>,
        txq: Arc<TxQueue>,
    ) -> Self {
        let mut rules = RuleMatrix::new();
        for cfg in &config.rules {
            let mut enabled = cfg.enabled;
            let alias = match cfg.alias.as_deref().map(compile_pattern).transpose() {
                Ok(alias) => alias.flatten(),
                Err(e) => {
                    error!("Connected digipeater rule {} to {} disabled: {}", cfg.from, cfg.to, e);
                    enabled = false;
                    None
                }
            };
            if enabled && (channels.mycall(cfg.from).is_none() || channels.mycall(cfg.to).is_none()) {
                error!(
                    "Connected digipeater rule {} to {} disabled: both channels need MYCALL",
                    cfg.from, cfg.to
                );
                enabled = false;
            }
            if enabled {
                info!("Connected mode digipeating from channel {} to {}", cfg.from, cfg.to);
            }
            rules.insert(
                cfg.from,
                cfg.to,
                CdigiRule {
                    alias,
                    filter: cfg.filter.clone(),
                    enabled,
                },
            );
        }

        Self {
            channels,
            rules,
            filter,
            txq,
            counts: HashMap::new(),
        }
    }

    /// Frames repeated from one channel to another so far
    pub fn count(&self, from_chan: usize, to_chan: usize) -> u64 {
        self.counts.get(&(from_chan, to_chan)).copied().unwrap_or(0)
    }

    /// Offer a received frame to every enabled rule leaving `from_chan`.
    ///
    /// Only radio channels take part; link layer timing means nothing over
    /// a network TNC.
    pub fn cdigipeat(&mut self, from_chan: usize, packet: &Packet) {
        if self.channels.medium(from_chan) != Medium::Radio {
            error!("cdigipeater: Did not expect to receive on invalid channel {}.", from_chan);
            return;
        }

        let mut targets: Vec<usize> = self
            .rules
            .from_channel(from_chan)
            .filter(|(_, rule)| rule.enabled)
            .map(|(to, _)| to)
            .collect();
        // Same channel first.
        targets.sort_by_key(|&to| to != from_chan);

        for to_chan in targets {
            if let Some(result) = self.cdigipeat_match(from_chan, to_chan, packet) {
                if let Err(e) = self.txq.append(to_chan, Priority::High, result) {
                    debug!("Connected digipeat to channel {} not queued: {}", to_chan, e);
                    continue;
                }
                *self.counts.entry((from_chan, to_chan)).or_insert(0) += 1;
            }
        }
    }

    /// Decide whether the rule for (`from_chan`, `to_chan`) repeats
    /// `packet`, and build the frame to send
    pub fn cdigipeat_match(&self, from_chan: usize, to_chan: usize, packet: &Packet) -> Option<Packet> {
        let rule = self.rules.get(from_chan, to_chan).filter(|r| r.enabled)?;
        let mycall_rec = self.channels.mycall(from_chan)?;
        let mycall_xmit = self.channels.mycall(to_chan)?;

        if let Some(expr) = &rule.filter {
            if !self.filter.allow(from_chan, to_chan, expr, packet) {
                return None;
            }
        }

        let r = packet.first_not_repeated()?;
        let repeater = packet.repeater(r)?;

        let matched = repeater.same_station(mycall_rec)
            || rule
                .alias
                .as_ref()
                .is_some_and(|re| re.is_match(&repeater.with_ssid()));
        if !matched {
            return None;
        }

        let mut xmit = mycall_xmit.clone();
        xmit.set_heard(true);
        let mut result = packet.clone();
        result
            .set_repeater(r, xmit)
            .map_err(|e| error!("Connected digipeater path rewrite failed: {}", e))
            .ok()?;
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CdigiRuleConfig, ChannelConfig};
    use crate::filter::ExprFilter;
    use relay_packet::Address;

    fn engine(alias: Option<&str>, filter: Option<&str>) -> (ConnectedDigipeater, Arc<TxQueue>) {
        let channels = Channels::new(&[ChannelConfig::radio("WB2OSZ-9"), ChannelConfig::radio("WB2OSZ-10")]);
        let config = CdigiConfig {
            rules: vec![
                CdigiRuleConfig {
                    from: 0,
                    to: 0,
                    alias: alias.map(String::from),
                    filter: filter.map(String::from),
                    enabled: true,
                },
                CdigiRuleConfig {
                    from: 0,
                    to: 1,
                    alias: None,
                    filter: None,
                    enabled: true,
                },
            ],
        };
        let txq = Arc::new(TxQueue::new(channels.media()));
        (
            ConnectedDigipeater::new(channels, &config, Arc::new(ExprFilter), Arc::clone(&txq)),
            txq,
        )
    }

    fn iframe(vias: &[(&str, u8, bool)]) -> Packet {
        let reps = vias
            .iter()
            .map(|&(call, ssid, used)| {
                let mut a = Address::new(call, ssid);
                a.set_heard(used);
                a
            })
            .collect();
        Packet::new_frame(
            Address::new("W1ABC", 0),
            Address::new("W2DEF", 0),
            reps,
            0x10,
            Some(0xf0),
            b"hello".to_vec(),
        )
        .unwrap()
    }

    #[test]
    fn test_explicit_call() {
        let (d, _) = engine(None, None);
        let out = d.cdigipeat_match(0, 0, &iframe(&[("WB2OSZ", 9, false)])).unwrap();
        assert_eq!(out.format_addrs(), "W1ABC>W2DEF,WB2OSZ-9*:");

        let out = d.cdigipeat_match(0, 1, &iframe(&[("WB2OSZ", 9, false)])).unwrap();
        assert_eq!(out.format_addrs(), "W1ABC>W2DEF,WB2OSZ-10*:");
    }

    #[test]
    fn test_no_wide_handling() {
        let (d, _) = engine(None, None);
        assert!(d.cdigipeat_match(0, 0, &iframe(&[("WIDE2", 2, false)])).is_none());
        assert!(d.cdigipeat_match(0, 0, &iframe(&[])).is_none());
    }

    #[test]
    fn test_alias() {
        let (d, _) = engine(Some("^NODE$"), None);
        let out = d
            .cdigipeat_match(0, 0, &iframe(&[("R1", 0, true), ("NODE", 0, false)]))
            .unwrap();
        assert_eq!(out.format_addrs(), "W1ABC>W2DEF,R1,WB2OSZ-9*:");
    }

    #[test]
    fn test_filter_applies() {
        let (d, _) = engine(None, Some("b/W9XYZ"));
        assert!(d.cdigipeat_match(0, 0, &iframe(&[("WB2OSZ", 9, false)])).is_none());
    }

    #[test]
    fn test_both_queued_high_same_first() {
        let (mut d, txq) = engine(None, None);
        d.cdigipeat(0, &iframe(&[("WB2OSZ", 9, false)]));
        assert_eq!(txq.count(0, Some(Priority::High), None, None, false), 1);
        assert_eq!(txq.count(1, Some(Priority::High), None, None, false), 1);
        assert_eq!(d.count(0, 0), 1);
        assert_eq!(d.count(0, 1), 1);
    }
}
