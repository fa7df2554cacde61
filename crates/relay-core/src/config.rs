//! Channel and digipeater rule configuration
//!
//! Configuration is plain serde data. It is compiled once at startup into
//! the rule tables the engines use; after that nothing mutates it.

use std::collections::BTreeMap;

use regex::Regex;
use relay_packet::{Address, ParseMode};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::error::RelayError;

/// Default number of seconds a digipeated packet is remembered
pub const DEFAULT_DEDUPE_SECS: u64 = 30;

/// What a channel number is attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Medium {
    /// Not configured
    #[default]
    None,
    /// Radio with an internal modem
    Radio,
    /// Virtual channel carrying APRS-IS traffic
    Igate,
    /// External TNC reached over the network
    NetTnc,
}

/// One channel slot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Attachment
    #[serde(default)]
    pub medium: Medium,
    /// Station call for this channel, e.g. `WB2OSZ-9`
    #[serde(default)]
    pub mycall: String,
}

impl ChannelConfig {
    /// Radio channel with the given call
    pub fn radio(mycall: &str) -> Self {
        Self {
            medium: Medium::Radio,
            mycall: mycall.to_string(),
        }
    }
}

/// Channel table indexed by channel number
#[derive(Debug, Clone, Default)]
pub struct Channels {
    entries: Vec<ChannelEntry>,
}

#[derive(Debug, Clone)]
struct ChannelEntry {
    medium: Medium,
    mycall: Option<Address>,
}

impl Channels {
    /// Build the table, parsing each call. A bad call is logged and leaves
    /// the channel without an identity.
    pub fn new(configs: &[ChannelConfig]) -> Self {
        let entries = configs
            .iter()
            .enumerate()
            .map(|(chan, cfg)| {
                let mycall = if cfg.mycall.is_empty() {
                    None
                } else {
                    match Address::parse(&cfg.mycall, ParseMode::Strict) {
                        Ok(addr) => Some(addr),
                        Err(e) => {
                            error!("Channel {}: invalid MYCALL \"{}\": {}", chan, cfg.mycall, e);
                            None
                        }
                    }
                };
                ChannelEntry {
                    medium: cfg.medium,
                    mycall,
                }
            })
            .collect();
        Self { entries }
    }

    /// Number of channel slots
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// No channels configured
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Medium of `chan`, `Medium::None` when out of range
    pub fn medium(&self, chan: usize) -> Medium {
        self.entries
            .get(chan)
            .map(|e| e.medium)
            .unwrap_or(Medium::None)
    }

    /// Parsed station call of `chan`
    pub fn mycall(&self, chan: usize) -> Option<&Address> {
        self.entries.get(chan).and_then(|e| e.mycall.as_ref())
    }

    /// Media of every channel, for sizing queues
    pub fn media(&self) -> Vec<Medium> {
        self.entries.iter().map(|e| e.medium).collect()
    }
}

/// Preemptive digipeating behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Preempt {
    /// Only the first unused address is considered
    #[default]
    Off,
    /// Remove every address before ours
    Drop,
    /// Mark unused addresses before ours as used
    Mark,
    /// Remove only unused addresses before ours
    Trace,
}

/// APRS digipeating rule for one (from, to) channel pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DigiRuleConfig {
    /// Receive channel
    pub from: usize,
    /// Transmit channel
    pub to: usize,
    /// Alias pattern, e.g. `^WIDE1-1$`
    #[serde(default)]
    pub alias: String,
    /// WIDEn-N pattern, e.g. `^WIDE[1-7]-[1-7]$`
    #[serde(default)]
    pub wide: String,
    /// Preemptive digipeating mode
    #[serde(default)]
    pub preempt: Preempt,
    /// Prefix that gets path compaction, e.g. `HOP`
    #[serde(default)]
    pub atgp: String,
    /// Optional filter expression
    #[serde(default)]
    pub filter: Option<String>,
    /// Digipeat along this pair
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Retransmit everything unmodified along this pair
    #[serde(default)]
    pub regen: bool,
}

fn default_true() -> bool {
    true
}

fn default_dedupe_secs() -> u64 {
    DEFAULT_DEDUPE_SECS
}

impl DigiRuleConfig {
    /// Typical WIDEn-N rule for a channel pair
    pub fn new(from: usize, to: usize, alias: &str, wide: &str) -> Self {
        Self {
            from,
            to,
            alias: alias.to_string(),
            wide: wide.to_string(),
            preempt: Preempt::Off,
            atgp: String::new(),
            filter: None,
            enabled: true,
            regen: false,
        }
    }
}

/// APRS digipeater configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DigiConfig {
    /// Seconds to suppress duplicates
    #[serde(default = "default_dedupe_secs")]
    pub dedupe_time_secs: u64,
    /// Per channel pair rules
    #[serde(default)]
    pub rules: Vec<DigiRuleConfig>,
}

impl Default for DigiConfig {
    fn default() -> Self {
        Self {
            dedupe_time_secs: DEFAULT_DEDUPE_SECS,
            rules: Vec::new(),
        }
    }
}

/// Connected mode digipeating rule for one (from, to) channel pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CdigiRuleConfig {
    /// Receive channel
    pub from: usize,
    /// Transmit channel
    pub to: usize,
    /// Optional alias pattern
    #[serde(default)]
    pub alias: Option<String>,
    /// Optional filter expression
    #[serde(default)]
    pub filter: Option<String>,
    /// Digipeat along this pair
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Connected mode digipeater configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CdigiConfig {
    /// Per channel pair rules
    #[serde(default)]
    pub rules: Vec<CdigiRuleConfig>,
}

/// Sparse table keyed by (from, to), iterated in ascending `to` order
#[derive(Debug, Clone)]
pub struct RuleMatrix<T> {
    rules: BTreeMap<(usize, usize), T>,
}

impl<T> Default for RuleMatrix<T> {
    fn default() -> Self {
        Self {
            rules: BTreeMap::new(),
        }
    }
}

impl<T> RuleMatrix<T> {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the rule for a pair
    pub fn insert(&mut self, from: usize, to: usize, rule: T) {
        if self.rules.insert((from, to), rule).is_some() {
            warn!("Duplicate rule for channel {} to {}, last one wins", from, to);
        }
    }

    /// Rule for a pair
    pub fn get(&self, from: usize, to: usize) -> Option<&T> {
        self.rules.get(&(from, to))
    }

    /// All rules leaving `from`, ascending by destination channel
    pub fn from_channel(&self, from: usize) -> impl Iterator<Item = (usize, &T)> {
        self.rules
            .range((from, 0)..=(from, usize::MAX))
            .map(|(&(_, to), rule)| (to, rule))
    }

    /// Number of configured pairs
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// No pairs configured
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Compile a pattern. Empty text means "no pattern".
pub fn compile_pattern(pattern: &str) -> Result<Option<Regex>, RelayError> {
    if pattern.is_empty() {
        return Ok(None);
    }
    Regex::new(pattern)
        .map(Some)
        .map_err(|e| RelayError::Pattern {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })
}
