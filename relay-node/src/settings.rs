//! Node settings

use std::path::Path;

use anyhow::Context;
use relay_core::{CdigiConfig, ChannelConfig, DigiConfig};
use relay_igate::IgateConfig;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Everything the node reads at startup
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NodeConfig {
    /// Channel table, indexed by channel number
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
    /// APRS digipeater
    #[serde(default)]
    pub digi: DigiConfig,
    /// Connected mode digipeater
    #[serde(default)]
    pub cdigi: CdigiConfig,
    /// APRS-IS gateway
    #[serde(default)]
    pub igate: IgateConfig,
}

impl NodeConfig {
    /// Read a JSON settings file, or use defaults when no path is given
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            info!("No configuration file given, using defaults");
            return Ok(Self::default());
        };

        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration {}", path.display()))?;
        let config: NodeConfig = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse configuration {}", path.display()))?;
        info!(
            "Loaded configuration {}: {} channels, {} digipeater rules",
            path.display(),
            config.channels.len(),
            config.digi.rules.len()
        );
        Ok(config)
    }
}
