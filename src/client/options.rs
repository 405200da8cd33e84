use embassy_time::Duration;
use heapless::String;

use crate::error::CloudError;
use crate::retry::RetryPolicy;

/// Maximum length of device and thing identifiers.
pub const MAX_ID_LEN: usize = 64;
/// Maximum length of the broker host name.
pub const MAX_ADDRESS_LEN: usize = 128;
/// Hex-encoded SHA-256.
pub const SHA256_HEX_LEN: usize = 64;

pub type Identifier = String<MAX_ID_LEN>;

/// Backoff settings for every retry point of the connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// Broker connection (and the physical link wait that precedes it).
    pub broker: RetryPolicy,
    /// Device topic subscription and device configuration wait.
    pub device_subscribe: RetryPolicy,
    /// Waiting for the device to be attached to a thing.
    pub device_attach: RetryPolicy,
    /// Thing topic subscription.
    pub thing_subscribe: RetryPolicy,
    /// Last-values request; the base is the reply timeout.
    pub last_values: RetryPolicy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            broker: RetryPolicy::new(Duration::from_millis(1_000), Duration::from_millis(32_000)),
            device_subscribe: RetryPolicy::new(
                Duration::from_millis(5_000),
                Duration::from_millis(30_000),
            )
            .with_max_attempts(10),
            device_attach: RetryPolicy::new(
                Duration::from_millis(5_000),
                Duration::from_millis(40_000),
            ),
            thing_subscribe: RetryPolicy::fixed(Duration::from_millis(10_000)).with_max_attempts(10),
            last_values: RetryPolicy::fixed(Duration::from_millis(10_000)).with_max_attempts(10),
        }
    }
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct CloudOptions {
    pub(crate) device_id: Identifier,
    pub(crate) thing_id: Identifier,
    pub(crate) broker_address: String<MAX_ADDRESS_LEN>,
    pub(crate) broker_port: u16,
    pub(crate) retry: RetryConfig,
    pub(crate) ask_before_ota: bool,
    pub(crate) firmware_sha256: String<SHA256_HEX_LEN>,
}

impl CloudOptions {
    pub fn new(device_id: &str, broker_address: &str, broker_port: u16) -> Result<Self, CloudError> {
        Ok(Self {
            device_id: copy_str(device_id)?,
            thing_id: Identifier::new(),
            broker_address: copy_str(broker_address)?,
            broker_port,
            retry: RetryConfig::default(),
            ask_before_ota: false,
            firmware_sha256: String::new(),
        })
    }

    /// Compiled-in thing id. The device attaches without waiting for its
    /// configuration message.
    pub fn with_thing_id(mut self, thing_id: &str) -> Result<Self, CloudError> {
        self.thing_id = copy_str(thing_id)?;
        Ok(self)
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Hold update requests until the confirmation hook approves them.
    pub fn ask_before_ota(mut self, ask: bool) -> Self {
        self.ask_before_ota = ask;
        self
    }

    /// Checksum of the running image, reported as `OTA_SHA256`.
    pub fn with_firmware_sha256(mut self, sha256: &str) -> Result<Self, CloudError> {
        self.firmware_sha256 = copy_str(sha256)?;
        Ok(self)
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn broker_address(&self) -> &str {
        &self.broker_address
    }

    pub fn broker_port(&self) -> u16 {
        self.broker_port
    }

    pub fn retry(&self) -> &RetryConfig {
        &self.retry
    }
}

fn copy_str<const N: usize>(s: &str) -> Result<String<N>, CloudError> {
    let mut out = String::new();
    out.push_str(s).map_err(|_| CloudError::IdentifierTooLong)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_lifecycle_constants() {
        let retry = RetryConfig::default();
        assert_eq!(retry.broker.delay(0), Duration::from_millis(1_000));
        assert_eq!(retry.broker.delay(10), Duration::from_millis(32_000));
        assert_eq!(retry.thing_subscribe.max_attempts, Some(10));
        assert_eq!(retry.last_values.delay(3), Duration::from_millis(10_000));
    }

    #[test]
    fn builder_keeps_values() {
        let opts = CloudOptions::new("dev", "broker.example.com", 8883)
            .unwrap()
            .ask_before_ota(true)
            .with_thing_id("thing")
            .unwrap();
        assert_eq!(opts.device_id(), "dev");
        assert_eq!(opts.broker_port(), 8883);
        assert!(opts.ask_before_ota);
        assert_eq!(opts.thing_id.as_str(), "thing");
    }

    #[test]
    fn long_identifiers_are_rejected() {
        let id = "d".repeat(MAX_ID_LEN + 1);
        assert_eq!(
            CloudOptions::new(&id, "broker", 1).unwrap_err(),
            CloudError::IdentifierTooLong
        );
    }
}
