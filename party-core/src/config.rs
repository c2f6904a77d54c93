//! Core settings injected by the driver.

use std::time::Duration;

use crate::chat::REACTION_TTL;
use crate::room::DEFAULT_ADDRESS_PREFIX;

#[derive(Debug, Clone)]
pub struct Config {
    /// Namespace prefix for peer addresses.
    pub address_prefix: String,
    /// How long received reactions stay visible.
    pub reaction_ttl: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            address_prefix: DEFAULT_ADDRESS_PREFIX.to_string(),
            reaction_ttl: REACTION_TTL,
        }
    }
}
