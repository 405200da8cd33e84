//! Connection lifecycle states and their tick handlers.

use super::CloudClient;
use super::event::CloudEvent;
use super::reserved::{DEVICE_INFO, OTA_ERROR, OTA_FLAGS, OTA_REQ, OTA_RESULT, OTA_URL};
use crate::codec::{self, REQUEST_LAST_VALUES, Selection};
use crate::error::CodecError;
use crate::ota::OtaError;
use crate::property::{PropertyValue, Text};
use crate::topics::ThingTopics;
use crate::transport::{Clock, CloudTransport, FirmwareUpdater};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum State {
    ConnectPhy,
    SyncTime,
    ConnectMqttBroker,
    SendDeviceProperties,
    SubscribeDeviceTopic,
    WaitDeviceConfig,
    CheckDeviceConfig,
    SubscribeThingTopics,
    RequestLastValues,
    Connected,
    Disconnect,
}

impl<T, C, U, const MAX_PROPS: usize, const BUF_SIZE: usize> CloudClient<T, C, U, MAX_PROPS, BUF_SIZE>
where
    T: CloudTransport,
    C: Clock,
    U: FirmwareUpdater,
{
    /// Runs the handler of the current state and returns the next one.
    pub(super) fn step(&mut self) -> State {
        let state = self.session.state;
        if state.requires_broker() && !self.transport.connected() {
            return match state {
                State::Connected => {
                    // The last payload may never have reached the broker.
                    self.retransmit.request();
                    State::Disconnect
                }
                _ => State::Disconnect,
            };
        }

        match state {
            State::ConnectPhy => self.connect_phy(),
            State::SyncTime => self.sync_time(),
            State::ConnectMqttBroker => self.connect_broker(),
            State::SendDeviceProperties => self.send_device_properties(),
            State::SubscribeDeviceTopic => self.subscribe_device_topic(),
            State::WaitDeviceConfig => self.wait_device_config(),
            State::CheckDeviceConfig => self.check_device_config(),
            State::SubscribeThingTopics => self.subscribe_thing_topics(),
            State::RequestLastValues => self.request_last_values(),
            State::Connected => self.connected(),
            State::Disconnect => self.disconnect(),
        }
    }

    fn connect_phy(&mut self) -> State {
        let now = self.clock.now();
        if self.transport.link_connected() && self.session.retries.broker.is_due(now) {
            State::SyncTime
        } else {
            State::ConnectPhy
        }
    }

    fn sync_time(&mut self) -> State {
        let posix_time = self.clock.posix_time();
        debug!("posix time {}", posix_time);
        State::ConnectMqttBroker
    }

    fn connect_broker(&mut self) -> State {
        let address = self.options.broker_address.as_str();
        let port = self.options.broker_port;
        if self.transport.connect(address, port) {
            info!("connected to broker {}:{}", address, port);
            self.session.retries.broker.reset();
            return State::SendDeviceProperties;
        }

        let now = self.clock.now();
        let retry = &mut self.session.retries.broker;
        let delay = retry.record_failure(now, &self.options.retry.broker);
        error!(
            "broker connection failed, attempt {}, retrying in {} ms",
            retry.attempts(),
            delay.as_millis()
        );
        State::ConnectPhy
    }

    fn send_device_properties(&mut self) -> State {
        self.publish_device(Selection::Only(DEVICE_INFO));
        State::SubscribeDeviceTopic
    }

    fn subscribe_device_topic(&mut self) -> State {
        let now = self.clock.now();
        let policy = &self.options.retry.device_subscribe;
        let retry = &mut self.session.retries.device_subscribe;

        if policy.exhausted(retry.attempts()) {
            warn!("no device configuration after {} attempts, reconnecting", retry.attempts());
            return self.restart();
        }
        if !retry.is_due(now) {
            return State::SubscribeDeviceTopic;
        }

        let subscribed = self.transport.subscribe(&self.session.device_topics.inbound);
        let delay = retry.record_attempt(now, policy);
        if subscribed {
            debug!(
                "subscribed to '{}', waiting {} ms for configuration",
                self.session.device_topics.inbound.as_str(),
                delay.as_millis()
            );
            State::WaitDeviceConfig
        } else {
            error!("device topic subscription failed, attempt {}", retry.attempts());
            State::SubscribeDeviceTopic
        }
    }

    fn wait_device_config(&mut self) -> State {
        if self.session.thing_id_outdated {
            return State::CheckDeviceConfig;
        }
        let now = self.clock.now();
        if self.session.retries.device_subscribe.is_due(now)
            && self.transport.unsubscribe(&self.session.device_topics.inbound)
        {
            debug!("no device configuration yet, resubscribing");
            return State::SubscribeDeviceTopic;
        }
        State::WaitDeviceConfig
    }

    fn check_device_config(&mut self) -> State {
        if self.session.attached {
            self.session.attached = false;
            info!("detached from thing");
            self.session.events.emit(CloudEvent::Disconnect);
        }

        self.session.thing_id_outdated = false;

        let thing_id = self.session.thing_id();
        if thing_id.is_empty() {
            self.leave_thing_topics();
            self.retransmit.clear();
            let now = self.clock.now();
            let delay = self
                .session
                .retries
                .device_attach
                .record_attempt(now, &self.options.retry.device_attach);
            warn!("device is not attached to a thing, checking again in {} ms", delay.as_millis());
            self.session.retries.device_subscribe.defer(now, delay);
            return State::WaitDeviceConfig;
        }

        let topics = match ThingTopics::resolve(thing_id) {
            Ok(topics) => topics,
            Err(err) => {
                error!("cannot derive thing topics: {:?}", err);
                self.leave_thing_topics();
                self.retransmit.clear();
                return State::WaitDeviceConfig;
            }
        };
        if topics != self.session.thing_topics {
            // Data buffered for another thing must not leak into this one.
            self.leave_thing_topics();
            self.retransmit.clear();
            self.session.retries.thing_subscribe.reset();
            self.session.retries.last_values.reset();
            self.session.thing_topics = topics;
        }
        self.session.retries.device_attach.reset();
        State::SubscribeThingTopics
    }

    /// Unsubscribes from the current thing topics, including a partial
    /// subscription left by a failed attempt, and forgets them.
    fn leave_thing_topics(&mut self) {
        for topic in self.session.thing_topics.inbound() {
            if !topic.is_empty() {
                self.transport.unsubscribe(topic);
            }
        }
        self.session.thing_topics = ThingTopics::default();
    }

    fn subscribe_thing_topics(&mut self) -> State {
        if self.session.thing_id_outdated {
            return State::CheckDeviceConfig;
        }
        let now = self.clock.now();
        let policy = &self.options.retry.thing_subscribe;
        let retry = &mut self.session.retries.thing_subscribe;

        if policy.exhausted(retry.attempts()) {
            error!("thing topic subscription failed {} times, reconnecting", retry.attempts());
            return self.restart();
        }
        if !retry.is_due(now) {
            return State::SubscribeThingTopics;
        }
        retry.record_attempt(now, policy);

        for topic in self.session.thing_topics.inbound() {
            if !self.transport.subscribe(topic) {
                error!("subscription to '{}' failed", topic);
                return State::SubscribeThingTopics;
            }
        }

        retry.reset();
        self.session.attached = true;
        info!("connected to thing '{}'", self.session.thing_id());
        self.session.events.emit(CloudEvent::Connect);
        State::RequestLastValues
    }

    fn request_last_values(&mut self) -> State {
        if self.session.thing_id_outdated {
            return State::CheckDeviceConfig;
        }
        let now = self.clock.now();
        let policy = &self.options.retry.last_values;
        let retry = &mut self.session.retries.last_values;
        if !retry.is_due(now) {
            return State::RequestLastValues;
        }

        debug!("requesting last values");
        self.transport
            .publish(&self.session.thing_topics.shadow.outbound, &REQUEST_LAST_VALUES);
        retry.record_attempt(now, policy);

        if policy.exhausted(retry.attempts()) {
            error!("no last values after {} requests, reconnecting", retry.attempts());
            return self.restart();
        }
        State::RequestLastValues
    }

    fn connected(&mut self) -> State {
        if self.session.thing_id_outdated {
            return State::CheckDeviceConfig;
        }

        let posix_time = self.clock.posix_time();
        self.session.thing.stamp_local_changes(posix_time);
        self.session.thing.schedule_periodic(posix_time);

        if self.flush_retransmit() {
            self.process_ota();
            self.publish_device(Selection::Dirty);
            self.publish_thing(posix_time);
        }

        if self.session.timezone.boundary_passed(posix_time) {
            info!("timezone boundary reached, refreshing last values");
            State::RequestLastValues
        } else {
            State::Connected
        }
    }

    fn disconnect(&mut self) -> State {
        warn!("broker connection lost");
        self.restart()
    }

    /// Stops the transport and starts the lifecycle over.
    fn restart(&mut self) -> State {
        self.transport.stop();
        self.session.events.emit(CloudEvent::Disconnect);
        self.session.reset_connection();
        State::ConnectPhy
    }

    /// Resends the buffered payload if requested. `false` while it is still owed.
    fn flush_retransmit(&mut self) -> bool {
        let Some(payload) = self.retransmit.pending() else {
            return true;
        };
        if !self
            .transport
            .publish(&self.session.thing_topics.data.outbound, payload)
        {
            warn!("retransmission failed");
            return false;
        }
        debug!("retransmitted {} bytes", payload.len());
        self.retransmit.settle();
        true
    }

    fn process_ota(&mut self) {
        let requested = self
            .session
            .device
            .value(OTA_REQ)
            .and_then(PropertyValue::as_bool)
            .unwrap_or(false);
        if !self.ota_gate.may_proceed(requested) {
            return;
        }

        let mut url = Text::new();
        if let Some(value) = self.session.device.value(OTA_URL).and_then(PropertyValue::as_text) {
            let _ = url.push_str(value);
        }
        info!("firmware update requested from '{}'", url.as_str());

        // Cleared flags go out first so a failed update is not retried forever.
        self.set_device(OTA_ERROR, PropertyValue::Int(OtaError::None as i64));
        self.set_device(OTA_REQ, PropertyValue::Bool(false));
        self.publish_device(Selection::Only(OTA_FLAGS));

        let code = match self.updater.as_mut() {
            Some(updater) => updater.apply_update(&url),
            None => OtaError::Unsupported as i32,
        };
        if code != OtaError::None as i32 {
            error!("firmware update failed with code {}", code);
        }
        self.set_device(OTA_ERROR, PropertyValue::Int(i64::from(code)));
        self.publish_device(Selection::Only(OTA_RESULT));
    }

    fn set_device(&mut self, name: &str, value: PropertyValue) {
        if let Err(err) = self.session.device.set(name, value) {
            error!("cannot update '{}': {:?}", name, err);
        }
    }

    /// Publishes the selected device properties on the device topic. A named
    /// selection that overflows the buffer goes out as several messages.
    /// Returns whether everything was queued.
    fn publish_device(&mut self, selection: Selection<'_>) -> bool {
        let Selection::Only(names) = selection else {
            return match codec::encode(&mut self.session.device, selection, &mut self.scratch) {
                Ok(len) => self.send_device_message(len),
                Err(err) => self.device_encode_failed(err),
            };
        };

        let mut from = 0;
        loop {
            let (len, next) =
                match codec::encode_named(&mut self.session.device, names, from, &mut self.scratch) {
                    Ok(encoded) => encoded,
                    Err(err) => return self.device_encode_failed(err),
                };
            if !self.send_device_message(len) {
                return false;
            }
            match next {
                Some(index) => from = index,
                None => return true,
            }
        }
    }

    fn send_device_message(&mut self, len: usize) -> bool {
        if len == 0 {
            return true;
        }
        if self
            .transport
            .publish(&self.session.device_topics.outbound, &self.scratch[..len])
        {
            let posix_time = self.clock.posix_time();
            self.session.device.commit(posix_time);
            true
        } else {
            warn!("device properties publish failed");
            self.session.device.abort();
            false
        }
    }

    fn device_encode_failed(&mut self, err: CodecError) -> bool {
        error!("device properties encoding failed: {:?}", err);
        self.session.device.abort();
        false
    }

    fn publish_thing(&mut self, posix_time: u32) {
        let len = match codec::encode(&mut self.session.thing, Selection::Dirty, &mut self.scratch) {
            Ok(0) => return,
            Ok(len) => len,
            Err(err) => {
                error!("thing properties encoding failed: {:?}", err);
                self.session.thing.abort();
                return;
            }
        };
        let payload = &self.scratch[..len];
        self.retransmit.store(payload);
        let sent = self
            .transport
            .publish(&self.session.thing_topics.data.outbound, payload);
        // Committed either way: the batch now lives in the retransmit buffer.
        self.session.thing.commit(posix_time);
        if sent {
            trace!("published {} bytes", len);
        } else {
            warn!("publish of {} bytes failed, queued for retransmission", len);
            self.retransmit.request();
        }
    }
}

impl State {
    /// States that only make sense with a live broker session.
    fn requires_broker(self) -> bool {
        !matches!(self, Self::ConnectPhy | Self::SyncTime | Self::ConnectMqttBroker | Self::Disconnect)
    }
}
