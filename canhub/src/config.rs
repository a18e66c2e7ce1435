use std::path::Path;

use serde::Deserialize;

use crate::driver::BusMode;

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(rename = "bus")]
    #[serde(default)]
    pub buses: Vec<Bus>,
    pub logger: Option<Logger>,
}

#[derive(Debug, Deserialize)]
pub struct Bus {
    pub name: String,
    pub kind: BusKind,
    pub start: Option<Start>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum BusKind {
    #[serde(rename = "virtual-onchip")]
    VirtualOnChip,
    #[serde(rename = "virtual-mcp2515")]
    VirtualMcp2515,
}

#[derive(Debug, Deserialize)]
pub struct Start {
    pub mode: BusMode,
    /// Bits per second.
    pub speed: u32,
}

#[derive(Debug, Deserialize)]
pub struct Logger {
    #[serde(rename = "type")]
    pub type_name: String,
    pub path: Option<String>,
    #[serde(default)]
    pub filters: Vec<String>,
}

impl Config {
    pub fn parse(text: &str) -> anyhow::Result<Config> {
        Ok(toml::from_str(text)?)
    }

    pub async fn load(path: &Path) -> anyhow::Result<Config> {
        let text = tokio::fs::read_to_string(path).await.map_err(|e| {
            anyhow::Error::new(e).context(format!("Could not read {}", path.display()))
        })?;
        Config::parse(&text)
    }
}
