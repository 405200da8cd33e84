//! Firmware update gating.
//!
//! The cloud requests an update by writing `OTA_REQ`. Whether the client acts
//! on it right away depends on the "ask before executing" policy and on an
//! optional confirmation hook supplied by the application (e.g. "only while
//! the pump is idle").

/// Update error codes published in `OTA_ERROR`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(i32)]
pub enum OtaError {
    None = 0,
    StorageInitFailed = 1,
    StorageOpenFailed = 2,
    StorageWriteFailed = 3,
    ChecksumMismatch = 4,
    DownloadFailed = 5,
    /// No updater is installed on this device.
    Unsupported = -1,
}

/// Returns `true` when the application agrees to start an update now.
pub type ConfirmCallback = fn() -> bool;

/// Decides whether a pending update request may run.
#[derive(Debug, Clone, Copy, Default)]
pub struct OtaGate {
    ask_before_executing: bool,
    confirm: Option<ConfirmCallback>,
}

impl OtaGate {
    pub const fn new(ask_before_executing: bool) -> Self {
        Self {
            ask_before_executing,
            confirm: None,
        }
    }

    pub fn set_confirmation(&mut self, confirm: ConfirmCallback) {
        self.confirm = Some(confirm);
    }

    /// A pending request proceeds when the confirmation hook approves it, or
    /// when the policy does not require asking.
    pub fn may_proceed(&self, requested: bool) -> bool {
        if !requested {
            return false;
        }
        let confirmed = self.confirm.is_some_and(|confirm| confirm());
        confirmed || !self.ask_before_executing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yes() -> bool {
        true
    }

    fn no() -> bool {
        false
    }

    #[test]
    fn nothing_happens_without_a_request() {
        assert!(!OtaGate::new(false).may_proceed(false));
    }

    #[test]
    fn proceeds_when_not_asking() {
        let mut gate = OtaGate::new(false);
        assert!(gate.may_proceed(true));
        gate.set_confirmation(no);
        assert!(gate.may_proceed(true));
    }

    #[test]
    fn asking_requires_confirmation() {
        let mut gate = OtaGate::new(true);
        assert!(!gate.may_proceed(true));
        gate.set_confirmation(no);
        assert!(!gate.may_proceed(true));
        gate.set_confirmation(yes);
        assert!(gate.may_proceed(true));
    }
}
