use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, Receiver, Sender};

use crate::client::CloudEvent;

/// Carries lifecycle events from the runtime to application tasks.
pub type CloudEventChannel<const DEPTH: usize> = Channel<CriticalSectionRawMutex, CloudEvent, DEPTH>;

pub type CloudEventSender<'a, const DEPTH: usize> =
    Sender<'a, CriticalSectionRawMutex, CloudEvent, DEPTH>;

pub type CloudEventReceiver<'a, const DEPTH: usize> =
    Receiver<'a, CriticalSectionRawMutex, CloudEvent, DEPTH>;
