//! Configuration for Archway
//!
//! CLI arguments and environment variable handling using clap.

use clap::Parser;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::crawl::{AllowList, CrawlConfig, CrawlMode};
use crate::hash::HashAlgorithm;
use crate::server::ConnectionConfig;
use crate::types::ArchwayError;

/// Archway - real-time WebSocket backbone for collaborative web archiving
#[derive(Parser, Debug, Clone)]
#[command(name = "archway")]
#[command(about = "Real-time WebSocket backbone for collaborative web archiving")]
pub struct Args {
    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// Enable development mode (in-memory stores when MongoDB is unreachable)
    #[arg(long, env = "DEV_MODE", default_value = "false")]
    pub dev_mode: bool,

    /// MongoDB connection URI
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017")]
    pub mongodb_uri: String,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "archway")]
    pub mongodb_db: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format (text or json)
    #[arg(long, env = "LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// Largest accepted inbound message, in bytes
    #[arg(long, env = "MAX_MESSAGE_SIZE", default_value = "32786")]
    pub max_message_size: usize,

    /// Seconds without an inbound frame before a connection is dropped.
    /// Pings are sent every 9/10 of this.
    #[arg(long, env = "PONG_WAIT_SECS", default_value = "60")]
    pub pong_wait_secs: u64,

    /// Seconds allowed to write one outbound frame
    #[arg(long, env = "WRITE_WAIT_SECS", default_value = "10")]
    pub write_wait_secs: u64,

    /// Outbound queue bound per connection
    #[arg(long, env = "SEND_QUEUE_CAPACITY", default_value = "256")]
    pub send_queue_capacity: usize,

    /// How outbound links are crawled after an archive
    #[arg(long, env = "CRAWL_MODE", value_enum, default_value = "throttled")]
    pub crawl_mode: CrawlMode,

    /// Milliseconds to wait before each throttled link fetch
    #[arg(long, env = "LINK_DELAY_MS", default_value = "3000")]
    pub link_delay_ms: u64,

    /// Comma-separated URL patterns allowed for archiving when no MongoDB is available
    #[arg(long, env = "ALLOW_LIST", value_delimiter = ',')]
    pub allow_list: Vec<String>,

    /// Signer id for the ledger entries the crawler writes about fetched pages
    #[arg(long, env = "LEDGER_KEY_ID")]
    pub ledger_key_id: Option<String>,

    /// Multihash algorithm for content identifiers
    #[arg(long, env = "HASH_ALGORITHM", default_value = "sha2-256")]
    pub hash_algorithm: String,
}

impl Args {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), ArchwayError> {
        if self.max_message_size == 0 {
            return Err(config_error("MAX_MESSAGE_SIZE must be greater than zero"));
        }

        if self.send_queue_capacity == 0 {
            return Err(config_error("SEND_QUEUE_CAPACITY must be greater than zero"));
        }

        if self.pong_wait_secs == 0 || self.write_wait_secs == 0 {
            return Err(config_error(
                "PONG_WAIT_SECS and WRITE_WAIT_SECS must be greater than zero",
            ));
        }

        if self.write_wait_secs >= self.pong_wait_secs {
            return Err(config_error("WRITE_WAIT_SECS must be shorter than PONG_WAIT_SECS"));
        }

        if !matches!(self.log_format.as_str(), "text" | "json") {
            return Err(ArchwayError::Config(format!(
                "unknown LOG_FORMAT: {}",
                self.log_format
            )));
        }

        self.algorithm()?;

        if self.ledger_key_id.as_deref() == Some("") {
            return Err(config_error("LEDGER_KEY_ID must not be empty when set"));
        }

        Ok(())
    }

    pub fn algorithm(&self) -> Result<HashAlgorithm, ArchwayError> {
        HashAlgorithm::from_str(&self.hash_algorithm)
            .map_err(|e| ArchwayError::Config(e.to_string()))
    }

    /// Transport limits for WebSocket connections
    pub fn connection_config(&self) -> ConnectionConfig {
        let pong_wait = Duration::from_secs(self.pong_wait_secs);
        ConnectionConfig {
            max_message_size: self.max_message_size,
            pong_wait,
            ping_period: pong_wait * 9 / 10,
            write_wait: Duration::from_secs(self.write_wait_secs),
            send_queue_capacity: self.send_queue_capacity,
        }
    }

    pub fn crawl_config(&self) -> CrawlConfig {
        CrawlConfig {
            mode: self.crawl_mode,
            link_delay: Duration::from_millis(self.link_delay_ms),
            ledger_key_id: self.ledger_key_id.clone(),
        }
    }

    /// Static allow-list used in place of the `subprimers` collection
    pub fn allow_list(&self) -> AllowList {
        AllowList::new(
            self.allow_list
                .iter()
                .map(|p| p.trim())
                .filter(|p| !p.is_empty()),
        )
    }
}

fn config_error(message: &str) -> ArchwayError {
    ArchwayError::Config(message.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        let mut argv = vec!["archway"];
        argv.extend_from_slice(args);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults() {
        let args = parse(&[]);
        assert!(args.validate().is_ok());
        assert_eq!(args.algorithm().unwrap(), HashAlgorithm::Sha2_256);

        let conn = args.connection_config();
        assert_eq!(conn.max_message_size, 32786);
        assert_eq!(conn.pong_wait, Duration::from_secs(60));
        assert_eq!(conn.ping_period, Duration::from_secs(54));
        assert_eq!(conn.write_wait, Duration::from_secs(10));

        let crawl = args.crawl_config();
        assert_eq!(crawl.mode, CrawlMode::Throttled);
        assert_eq!(crawl.link_delay, Duration::from_secs(3));
        assert!(crawl.ledger_key_id.is_none());
    }

    #[test]
    fn test_allow_list_parsing() {
        let args = parse(&["--allow-list", "example.com, archive.org,,"]);
        assert_eq!(args.allow_list().patterns(), ["example.com", "archive.org"]);
    }

    #[test]
    fn test_crawl_mode() {
        let args = parse(&["--crawl-mode", "batch", "--link-delay-ms", "10"]);
        let crawl = args.crawl_config();
        assert_eq!(crawl.mode, CrawlMode::Batch);
        assert_eq!(crawl.link_delay, Duration::from_millis(10));
    }

    #[test]
    fn test_validation_failures() {
        assert!(parse(&["--write-wait-secs", "60"]).validate().is_err());
        assert!(parse(&["--send-queue-capacity", "0"]).validate().is_err());
        assert!(parse(&["--max-message-size", "0"]).validate().is_err());
        assert!(parse(&["--hash-algorithm", "md5"]).validate().is_err());
        assert!(parse(&["--log-format", "xml"]).validate().is_err());
        assert!(parse(&["--hash-algorithm", "SHA2-512"]).validate().is_ok());

        let err = parse(&["--hash-algorithm", "md5"]).validate().unwrap_err();
        assert!(matches!(err, ArchwayError::Config(_)));
        assert!(err.to_string().contains("md5"));
    }
}
