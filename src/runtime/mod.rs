//! Async driver for [`CloudClient`](crate::CloudClient).
//!
//! The client itself is poll-based and never awaits. [`CloudRuntime`] paces
//! it with an Embassy [`Ticker`](embassy_time::Ticker), stops it when a
//! [`StopSignal`] fires and forwards lifecycle events to other tasks through
//! a [`CloudEventChannel`].
//!
//! ```ignore
//! static EVENTS: CloudEventChannel<4> = CloudEventChannel::new();
//! static STOP: StopSignal = StopSignal::new();
//!
//! #[embassy_executor::task]
//! async fn cloud_task(client: Client) {
//!     let mut runtime = CloudRuntime::new(client, &STOP).with_events(EVENTS.sender());
//!     runtime.run().await;
//! }
//! ```

mod event_loop;
mod events;

pub use event_loop::{CloudRuntime, DEFAULT_TICK_PERIOD, StopSignal};
pub use events::{CloudEventChannel, CloudEventReceiver, CloudEventSender};
