//! # Cloud Property Synchronization for Embedded Systems
//!
//! `myrtio-cloud` is a `no_std` client that keeps a device's properties in
//! sync with an IoT cloud over a publish/subscribe broker.
//!
//! ## Core Features
//!
//! - **`no_std` & `no_alloc`:** Property containers, topics and buffers are
//!   `heapless` types sized with const generics.
//! - **Non-blocking:** [`CloudClient::tick`] advances the connection lifecycle
//!   by at most one step and never waits on the network, so it fits a
//!   super-loop as well as an Embassy task.
//! - **Transport Agnostic:** the broker session, the clock and the firmware
//!   updater are injected through the traits in [`transport`].
//! - **Compact wire format:** properties travel as SenML records in CBOR.
//!
//! ## Architecture
//!
//! ### 1. Direct Client Usage
//!
//! ```ignore
//! let options = CloudOptions::new(DEVICE_ID, "broker.example.com", 8883)?;
//! let mut client = CloudClient::<_, _, _, 16, 256>::new(mqtt, EmbassyClock::new(), options);
//! client.register(Property::new("temperature", 21.5f32).publish_on_change(0.5))?;
//! client.register(Property::new("pump", false).read_write().on_update(on_pump))?;
//! client.begin()?;
//!
//! loop {
//!     client.thing_properties_mut().set("temperature", read_sensor())?;
//!     client.tick();
//! }
//! ```
//!
//! ### 2. Async Runtime
//!
//! [`runtime::CloudRuntime`] ticks the client from an Embassy task, stops it
//! on a signal and forwards [`CloudEvent`]s to other tasks through a channel.
//!
//! ## Connection Lifecycle
//!
//! The client connects to the broker, publishes its device information and
//! waits on the device topic for the cloud to tell it which thing it belongs
//! to. It then subscribes to the thing topics, requests the last known values
//! and settles in [`State::Connected`], where local changes are published on
//! every tick. Any failure is retried with exponential backoff
//! ([`retry::RetryPolicy`]); a retry point that keeps failing restarts the
//! lifecycle from the physical link.

#![cfg_attr(not(test), no_std)]

#[macro_use]
mod fmt;

pub mod client;
pub mod codec;
pub mod error;
pub mod ota;
pub mod property;
pub mod retry;
pub mod runtime;
pub mod topics;
pub mod transport;

// Re-export key types for easier access at the crate root.
pub use client::{CloudClient, CloudEvent, CloudOptions, RetryConfig, State};
pub use error::{CloudError, CodecError, PropertyError};
pub use property::{Permission, Property, PropertyContainer, PropertyValue, SyncPolicy};
pub use transport::{
    Clock, CloudTransport, EmbassyClock, FirmwareUpdater, InboundMessage, MessageHandler,
    NoUpdater,
};
