use serde::{Deserialize, Serialize};
use std::{collections::HashSet, net::IpAddr};
use tidybox::{CollisionStrategy, DEFAULT_BLACKHOLE_ADDRESS};

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct Config {
    /// Passwords tried against encrypted archives.
    #[serde(default)]
    pub passwords: Vec<String>,
    /// Default collision strategy for extraction.
    #[serde(default)]
    pub collision: CollisionStrategy,
    /// Default address blocked domains map to in hosts-format output.
    #[serde(default = "default_blackhole_address")]
    pub blackhole_address: IpAddr,
    /// Whether blocklist conversion drops duplicate domains by default.
    #[serde(default)]
    pub deduplicate: bool,
    /// Domains never emitted by blocklist conversion.
    #[serde(default)]
    pub ignore: HashSet<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            passwords: Vec::new(),
            collision: CollisionStrategy::default(),
            blackhole_address: default_blackhole_address(),
            deduplicate: false,
            ignore: HashSet::new(),
        }
    }
}

fn default_blackhole_address() -> IpAddr {
    DEFAULT_BLACKHOLE_ADDRESS
        .parse()
        .expect("failed to parse default blackhole address")
}
