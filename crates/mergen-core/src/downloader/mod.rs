//! Segmented HTTP transfer.
//!
//! Runs up to N concurrent Range GETs (libcurl easy handles on worker
//! threads), writes each body at its segment offset through a shared
//! `StorageWriter`, and publishes progress through a lock-free `SegmentBoard`.

mod board;
mod pool;
mod segment;

use std::time::Duration;

use crate::config::MergenConfig;

pub use board::{SegmentBoard, SegmentSlot};
pub use pool::{run_pool, PoolConfig, PoolOutcome, SegmentFailure};
pub use segment::{fetch_segment, fetch_segment_with_retry, SegmentJob};

/// libcurl options shared by the probe and every segment transfer.
#[derive(Debug, Clone)]
pub struct TransferOptions {
    pub connect_timeout: Duration,
    /// Abort if throughput stays below this many bytes/s for `low_speed_time`.
    pub low_speed_limit: u32,
    pub low_speed_time: Duration,
    /// Receive buffer size; bounds the bytes delivered per write callback.
    pub buffer_size: usize,
    pub proxy: Option<String>,
    pub user_agent: String,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self::from_config(&MergenConfig::default())
    }
}

impl TransferOptions {
    pub fn from_config(cfg: &MergenConfig) -> Self {
        Self {
            connect_timeout: Duration::from_secs(cfg.connect_timeout_secs.max(1)),
            low_speed_limit: cfg.low_speed_limit,
            low_speed_time: Duration::from_secs(cfg.low_speed_time_secs.max(1)),
            buffer_size: cfg.chunk_size.max(1024),
            proxy: cfg.proxy.clone(),
            user_agent: cfg
                .user_agent
                .clone()
                .unwrap_or_else(|| format!("mergen/{}", env!("CARGO_PKG_VERSION"))),
        }
    }

    /// Apply these options to a fresh easy handle.
    pub(crate) fn apply(&self, easy: &mut curl::easy::Easy) -> Result<(), curl::Error> {
        easy.follow_location(true)?;
        easy.max_redirections(10)?;
        easy.connect_timeout(self.connect_timeout)?;
        easy.low_speed_limit(self.low_speed_limit)?;
        easy.low_speed_time(self.low_speed_time)?;
        easy.buffer_size(self.buffer_size)?;
        easy.useragent(&self.user_agent)?;
        if let Some(proxy) = &self.proxy {
            easy.proxy(proxy)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_follow_config() {
        let mut cfg = MergenConfig::default();
        cfg.chunk_size = 64 * 1024;
        cfg.proxy = Some("http://proxy:3128".into());
        cfg.user_agent = Some("test-agent".into());
        let o = TransferOptions::from_config(&cfg);
        assert_eq!(o.buffer_size, 64 * 1024);
        assert_eq!(o.proxy.as_deref(), Some("http://proxy:3128"));
        assert_eq!(o.user_agent, "test-agent");
        assert_eq!(o.connect_timeout, Duration::from_secs(30));
    }

    #[test]
    fn default_user_agent_names_the_crate() {
        let o = TransferOptions::default();
        assert!(o.user_agent.starts_with("mergen/"));
        assert!(o.proxy.is_none());
    }
}
