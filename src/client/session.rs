//! Connection state shared between the tick handlers and the inbound message
//! dispatch.

use super::event::{CloudEvent, EventDispatcher};
use super::reserved::{OTA_URL, THING_ID, TZ_DST_UNTIL, TZ_OFFSET};
use super::state::State;
use crate::codec;
use crate::property::{PropertyContainer, PropertyValue};
use crate::retry::RetryState;
use crate::topics::{ThingTopics, TopicPair};
use crate::transport::{InboundMessage, MessageHandler};

#[derive(Debug, Default)]
pub(crate) struct Retries {
    pub(crate) broker: RetryState,
    pub(crate) device_subscribe: RetryState,
    pub(crate) device_attach: RetryState,
    pub(crate) thing_subscribe: RetryState,
    pub(crate) last_values: RetryState,
}

impl Retries {
    /// Everything except the broker backoff, which must survive a reconnect.
    fn reset_session(&mut self) {
        self.device_subscribe.reset();
        self.device_attach.reset();
        self.thing_subscribe.reset();
        self.last_values.reset();
    }
}

/// Timezone data received with the thing properties.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Timezone {
    pub(crate) offset: i64,
    /// Zero while no DST boundary is known.
    pub(crate) dst_until: i64,
}

impl Timezone {
    pub(crate) fn boundary_passed(&self, posix_time: u32) -> bool {
        self.dst_until != 0 && i64::from(posix_time) >= self.dst_until
    }
}

pub(crate) struct Session<const N: usize> {
    pub(crate) state: State,
    /// Transition requested by message dispatch, applied by the next tick.
    pub(crate) pending_state: Option<State>,
    pub(crate) device: PropertyContainer<N>,
    pub(crate) thing: PropertyContainer<N>,
    pub(crate) device_topics: TopicPair,
    pub(crate) thing_topics: ThingTopics,
    pub(crate) thing_id_outdated: bool,
    /// Subscribed to the topics of a thing.
    pub(crate) attached: bool,
    pub(crate) retries: Retries,
    pub(crate) events: EventDispatcher,
    pub(crate) timezone: Timezone,
}

impl<const N: usize> Session<N> {
    pub(crate) fn new() -> Self {
        Self {
            state: State::ConnectPhy,
            pending_state: None,
            device: PropertyContainer::new(),
            thing: PropertyContainer::new(),
            device_topics: TopicPair::default(),
            thing_topics: ThingTopics::default(),
            thing_id_outdated: false,
            attached: false,
            retries: Retries::default(),
            events: EventDispatcher::default(),
            timezone: Timezone::default(),
        }
    }

    pub(crate) fn thing_id(&self) -> &str {
        self.device
            .value(THING_ID)
            .and_then(PropertyValue::as_text)
            .unwrap_or("")
    }

    /// Drops everything tied to the broker session. A known thing is
    /// re-attached after the device topic is back.
    pub(crate) fn reset_connection(&mut self) {
        self.pending_state = None;
        self.attached = false;
        self.retries.reset_session();
        self.thing_id_outdated = !self.thing_id().is_empty();
    }

    fn on_device_config(&mut self, payload: &[u8]) {
        self.retries.device_subscribe.reset();
        if let Err(err) = codec::decode(&mut self.device, payload, false) {
            warn!("dropping device configuration: {:?}", err);
            return;
        }

        let mut thing_changed = false;
        let mut url_written = false;
        self.device.drain_cloud_updates(|p| match p.name() {
            THING_ID => thing_changed = true,
            OTA_URL => url_written = true,
            _ => {}
        });
        if thing_changed {
            info!("thing id set to '{}'", self.thing_id());
            self.thing_id_outdated = true;
        }
        if url_written {
            // Echoed back on the device topic by the next connected tick.
            let _ = self.device.mark_dirty(OTA_URL);
        }
    }

    fn on_thing_data(&mut self, payload: &[u8], is_sync_reply: bool) -> bool {
        match codec::decode(&mut self.thing, payload, is_sync_reply) {
            Ok(records) => trace!("applied {} records", records),
            Err(err) => {
                warn!("dropping thing update: {:?}", err);
                return false;
            }
        }
        self.thing.drain_cloud_updates(|_| {});
        self.refresh_timezone();
        true
    }

    fn on_last_values(&mut self, payload: &[u8]) {
        if self.state != State::RequestLastValues {
            debug!("ignoring last values outside of sync");
            return;
        }
        if !self.on_thing_data(payload, true) {
            return;
        }
        self.events.emit(CloudEvent::Sync);
        self.retries.last_values.reset();
        self.pending_state = Some(State::Connected);
    }

    fn refresh_timezone(&mut self) {
        let read = |name| self.thing.value(name).and_then(PropertyValue::as_int);
        self.timezone = Timezone {
            offset: read(TZ_OFFSET).unwrap_or(self.timezone.offset),
            dst_until: read(TZ_DST_UNTIL).unwrap_or(self.timezone.dst_until),
        };
    }
}

fn is_topic(subscribed: &str, topic: &str) -> bool {
    !subscribed.is_empty() && subscribed == topic
}

impl<const N: usize> MessageHandler for Session<N> {
    fn on_message(&mut self, msg: &InboundMessage<'_>) {
        if is_topic(&self.device_topics.inbound, msg.topic) {
            self.on_device_config(msg.payload);
        } else if is_topic(&self.thing_topics.data.inbound, msg.topic) {
            self.on_thing_data(msg.payload, false);
        } else if is_topic(&self.thing_topics.shadow.inbound, msg.topic) {
            self.on_last_values(msg.payload);
        } else {
            trace!("ignoring message on '{}'", msg.topic);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dst_boundary_zero_means_unknown() {
        let tz = Timezone::default();
        assert!(!tz.boundary_passed(u32::MAX));
        let tz = Timezone {
            offset: 3600,
            dst_until: 1_000,
        };
        assert!(!tz.boundary_passed(999));
        assert!(tz.boundary_passed(1_000));
    }

    #[test]
    fn empty_topics_never_match() {
        assert!(!is_topic("", ""));
        assert!(is_topic("/a/d/x/e/i", "/a/d/x/e/i"));
        assert!(!is_topic("/a/d/x/e/i", "/a/d/y/e/i"));
    }
}
