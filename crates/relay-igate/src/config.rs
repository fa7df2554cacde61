//! IGate configuration
//!
//! Plain serde data read once at startup. Limits outside their allowed
//! ranges are clamped with a warning by [`IgateConfig::validated`].

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Usual APRS-IS client port
pub const DEFAULT_PORT: u16 = 14580;

/// Default packets per minute gated to RF
pub const DEFAULT_TX_LIMIT_1: u32 = 6;
/// Highest allowed per minute limit
pub const MAX_TX_LIMIT_1: u32 = 20;
/// Default packets per five minutes gated to RF
pub const DEFAULT_TX_LIMIT_5: u32 = 20;
/// Highest allowed per five minute limit
pub const MAX_TX_LIMIT_5: u32 = 80;

/// Default SATgate delay in seconds
pub const DEFAULT_SATGATE_DELAY: u64 = 10;
/// Shortest SATgate delay
pub const MIN_SATGATE_DELAY: u64 = 5;
/// Longest SATgate delay
pub const MAX_SATGATE_DELAY: u64 = 30;

/// Destination prefix identifying our software on the air
pub const APP_TOCALL: &str = "APDW";

/// IGate settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IgateConfig {
    /// APRS-IS server host name
    pub server: String,
    /// APRS-IS server port
    pub port: u16,
    /// Login call, usually with SSID
    pub login: String,
    /// Passcode for the login call
    pub passcode: String,
    /// Server side filter sent with the login
    pub server_filter: Option<String>,
    /// Channel to transmit Internet traffic on, `None` for receive only
    pub tx_chan: Option<usize>,
    /// Via path for frames we transmit, e.g. `WIDE1-1`
    pub tx_via: String,
    /// Maximum packets gated to RF per minute
    pub tx_limit_1: u32,
    /// Maximum packets gated to RF per five minutes
    pub tx_limit_5: u32,
    /// Positions to pass unfiltered after gating a message for a station
    pub igmsp: u32,
    /// Seconds to suppress duplicate RF to Internet packets, 0 disables
    pub rx2ig_dedupe_secs: u64,
    /// Seconds to hold directly heard packets, 0 disables SATgate mode
    pub satgate_delay_secs: u64,
    /// Virtual channel that receives everything from the server
    pub ichannel: Option<usize>,
    /// Filter expressions for RF channel to Internet, keyed by channel
    pub rf_filters: BTreeMap<usize, String>,
    /// Filter expressions for Internet to RF channel, keyed by channel
    pub is_filters: BTreeMap<usize, String>,
    /// Software name in the login line
    pub app_name: String,
    /// Software version in the login line, `major.minor`
    pub app_version: String,
}

impl Default for IgateConfig {
    fn default() -> Self {
        Self {
            server: String::new(),
            port: DEFAULT_PORT,
            login: String::new(),
            passcode: String::new(),
            server_filter: None,
            tx_chan: None,
            tx_via: String::new(),
            tx_limit_1: DEFAULT_TX_LIMIT_1,
            tx_limit_5: DEFAULT_TX_LIMIT_5,
            igmsp: 1,
            rx2ig_dedupe_secs: 0,
            satgate_delay_secs: 0,
            ichannel: None,
            rf_filters: BTreeMap::new(),
            is_filters: BTreeMap::new(),
            app_name: "relayd".to_string(),
            app_version: format!(
                "{}.{}",
                env!("CARGO_PKG_VERSION_MAJOR"),
                env!("CARGO_PKG_VERSION_MINOR")
            ),
        }
    }
}

impl IgateConfig {
    /// Server, login and passcode are all present
    pub fn is_enabled(&self) -> bool {
        !self.server.is_empty() && !self.login.is_empty() && !self.passcode.is_empty()
    }

    /// Clamp limits into their allowed ranges
    pub fn validated(mut self) -> Self {
        if self.tx_limit_1 < 1 || self.tx_limit_1 > MAX_TX_LIMIT_1 {
            let clamped = self.tx_limit_1.clamp(1, MAX_TX_LIMIT_1);
            warn!(
                "IGate transmit limit per minute {} out of range, using {}",
                self.tx_limit_1, clamped
            );
            self.tx_limit_1 = clamped;
        }
        if self.tx_limit_5 < 1 || self.tx_limit_5 > MAX_TX_LIMIT_5 {
            let clamped = self.tx_limit_5.clamp(1, MAX_TX_LIMIT_5);
            warn!(
                "IGate transmit limit per 5 minutes {} out of range, using {}",
                self.tx_limit_5, clamped
            );
            self.tx_limit_5 = clamped;
        }
        if self.satgate_delay_secs != 0
            && !(MIN_SATGATE_DELAY..=MAX_SATGATE_DELAY).contains(&self.satgate_delay_secs)
        {
            let clamped = self
                .satgate_delay_secs
                .clamp(MIN_SATGATE_DELAY, MAX_SATGATE_DELAY);
            warn!(
                "SATgate delay {} seconds out of range, using {}",
                self.satgate_delay_secs, clamped
            );
            self.satgate_delay_secs = clamped;
        }
        self
    }

    /// SATgate hold time, `None` when disabled
    pub fn satgate_delay(&self) -> Option<Duration> {
        (self.satgate_delay_secs > 0).then(|| Duration::from_secs(self.satgate_delay_secs))
    }

    /// RF to Internet duplicate window, `None` when disabled
    pub fn rx2ig_dedupe(&self) -> Option<Duration> {
        (self.rx2ig_dedupe_secs > 0).then(|| Duration::from_secs(self.rx2ig_dedupe_secs))
    }

    /// `user <call> pass <code> vers <app> <ver>[ filter <expr>]`
    pub fn login_line(&self) -> String {
        let mut line = format!(
            "user {} pass {} vers {} {}",
            self.login, self.passcode, self.app_name, self.app_version
        );
        if let Some(filter) = self.server_filter.as_deref().filter(|f| !f.is_empty()) {
            line.push_str(" filter ");
            line.push_str(filter);
        }
        line
    }

    /// Destination for frames we originate, e.g. `APDW01`
    pub fn tocall(&self) -> String {
        let digits: String = self
            .app_version
            .split('.')
            .take(2)
            .flat_map(|part| part.chars().filter(char::is_ascii_digit))
            .collect();
        let mut tocall = format!("{}{}", APP_TOCALL, digits);
        tocall.truncate(6);
        tocall
    }

    /// `,VIA` suffix for frames we originate, empty when none
    pub fn via_suffix(&self) -> String {
        let via = self.tx_via.trim_start_matches(',');
        if via.is_empty() {
            String::new()
        } else {
            format!(",{}", via)
        }
    }
}
