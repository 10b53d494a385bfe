use std::{default::Default, time::Duration};

use crate::constants::MAX_PLAIN_BLOCK_SIZE;

#[derive(Clone, Debug)]
/// Configuration options to tune blockwise-transfer behavior.
pub struct Config {
    /// Number of 1024-byte sub-blocks bulked into one on-wire BERT block.
    /// Values > 1 enable BERT on outbound messages. Inbound BERT blocks are
    /// handled irrespective of this setting.
    pub number_of_bulk_blocks: usize,
    /// Preferred block size for outbound blockwise transfers.
    /// One of 16, 32, 64, 128, 256, 512 or 1024.
    pub preferred_block_size: usize,
    /// Payload size threshold above which a body is sent blockwise.
    pub max_message_size: usize,
    /// Upper bound for a reassembled request or response body. A body
    /// exceeding this is refused with 4.13 (Request Entity Too Large).
    /// A value of 0 disables transparent blockwise handling.
    pub max_resource_body_size: usize,
    /// How long an idle transfer is kept before it is garbage collected.
    pub blockwise_status_lifetime: Duration,
    /// Maximum number of concurrently tracked transfers per direction.
    pub max_active_transfers: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            number_of_bulk_blocks: 1, // BERT disabled on outbound by default
            preferred_block_size: MAX_PLAIN_BLOCK_SIZE,
            max_message_size: 1024,
            max_resource_body_size: 8192,
            blockwise_status_lifetime: Duration::from_secs(30),
            max_active_transfers: 1024,
        }
    }
}

impl Config {
    /// Returns true when outbound messages use BERT bulking.
    pub fn bert_enabled(&self) -> bool {
        self.number_of_bulk_blocks > 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_disables_bert() {
        let config = Config::default();
        assert_eq!(config.number_of_bulk_blocks, 1);
        assert!(!config.bert_enabled());
    }

    #[test]
    fn test_bulk_blocks_enable_bert() {
        let config = Config { number_of_bulk_blocks: 4, ..Config::default() };
        assert!(config.bert_enabled());
    }
}
