//! # Collaborator Traits
//!
//! The client never touches sockets, clocks or flash directly. Everything it
//! needs from the board comes through the traits in this module, so the state
//! machine has no board-specific branches and can be driven by mocks on the
//! host.
//!
//! All methods must return immediately. A transport that is still working on
//! a request reports failure (or "not connected") and the state machine tries
//! again on a later tick.

use embassy_time::Instant;

/// A message received on a subscribed topic.
#[derive(Debug, Clone, Copy)]
pub struct InboundMessage<'a> {
    pub topic: &'a str,
    pub payload: &'a [u8],
}

/// Receives messages drained from the transport during [`CloudTransport::poll`].
pub trait MessageHandler {
    fn on_message(&mut self, msg: &InboundMessage<'_>);
}

/// A non-blocking publish/subscribe transport, typically an MQTT client over TLS.
pub trait CloudTransport {
    /// Whether the physical network link (WiFi, cellular, ethernet) is up.
    fn link_connected(&mut self) -> bool {
        true
    }

    /// Starts a broker session. Returns `true` once connected.
    fn connect(&mut self, address: &str, port: u16) -> bool;

    /// Whether the broker session is alive.
    fn connected(&mut self) -> bool;

    fn subscribe(&mut self, topic: &str) -> bool;

    fn unsubscribe(&mut self, topic: &str) -> bool;

    /// Queues `payload` for transmission. `true` means the transport accepted it.
    fn publish(&mut self, topic: &str, payload: &[u8]) -> bool;

    /// Tears the session down.
    fn stop(&mut self);

    /// Hands every message received since the last call to `handler`.
    fn poll(&mut self, handler: &mut dyn MessageHandler);
}

/// Time source.
pub trait Clock {
    /// Monotonic time used for retry deadlines.
    fn now(&self) -> Instant;

    /// Wall-clock seconds since the Unix epoch.
    fn posix_time(&self) -> u32;
}

/// Clock backed by the embassy time driver.
///
/// The posix time is derived from the monotonic clock plus an offset set by
/// whatever synchronizes wall time on the board (NTP, cellular network time,
/// an RTC).
#[derive(Debug, Default, Clone, Copy)]
pub struct EmbassyClock {
    epoch_offset: u64,
}

impl EmbassyClock {
    pub const fn new() -> Self {
        Self { epoch_offset: 0 }
    }

    /// Aligns the clock so that `posix_time()` currently returns `posix_now`.
    pub fn set_posix_time(&mut self, posix_now: u32) {
        self.epoch_offset = u64::from(posix_now).saturating_sub(Instant::now().as_secs());
    }
}

impl Clock for EmbassyClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn posix_time(&self) -> u32 {
        let secs = self.epoch_offset.saturating_add(Instant::now().as_secs());
        u32::try_from(secs).unwrap_or(u32::MAX)
    }
}

/// Applies a firmware image downloaded from `url`.
///
/// Returns the update error code, `0` on success. Implementations usually
/// reset the board on success and never return.
pub trait FirmwareUpdater {
    fn apply_update(&mut self, url: &str) -> i32;
}

/// Placeholder for devices without update support.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoUpdater;

impl FirmwareUpdater for NoUpdater {
    fn apply_update(&mut self, _url: &str) -> i32 {
        crate::ota::OtaError::Unsupported as i32
    }
}
