//! Small shared helpers

use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::compose::merge::normalize_architecture;

/// Build metadata printed by `--version` and served on `/version`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

pub fn version_info() -> VersionInfo {
    VersionInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: option_env!("GIT_HASH").unwrap_or("unknown").to_string(),
        build_time: option_env!("BUILD_TIME").unwrap_or("unknown").to_string(),
    }
}

/// Backoff applied after queue failures
#[derive(Debug, Clone)]
pub struct CooldownOptions {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for CooldownOptions {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

/// `base_delay * multiplier^attempt`, capped at `max_delay`
pub fn calc_exp_backoff(options: &CooldownOptions, attempt: u32) -> Duration {
    let exponent = attempt.min(i32::MAX as u32) as i32;
    let delay = options.base_delay.as_secs_f64() * options.multiplier.powi(exponent);
    Duration::from_secs_f64(delay.min(options.max_delay.as_secs_f64()))
}

/// Milliseconds since the Unix epoch
pub fn epoch_millis() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

/// Lowercase hex SHA-256 of `data`
pub fn sha256_hash(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// Container image architecture name of the running host
pub fn host_architecture() -> String {
    normalize_architecture(std::env::consts::ARCH).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exp_backoff() {
        let options = CooldownOptions::default();

        assert_eq!(calc_exp_backoff(&options, 0), Duration::from_millis(500));
        assert_eq!(calc_exp_backoff(&options, 2), Duration::from_secs(2));
        assert_eq!(calc_exp_backoff(&options, 20), Duration::from_secs(30));
    }

    #[test]
    fn test_sha256_hash() {
        assert_eq!(
            sha256_hash(b"hello world"),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_host_architecture_is_normalized() {
        let arch = host_architecture();
        assert_ne!(arch, "x86_64");
        assert_ne!(arch, "aarch64");
    }
}
