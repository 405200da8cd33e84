//! # Cloud Client
//!
//! [`CloudClient`] owns the transport, the clock, the optional firmware
//! updater and both property containers. The application registers its thing
//! properties, calls [`CloudClient::begin`] once and then [`CloudClient::tick`]
//! periodically, either from its own loop or through
//! [`CloudRuntime`](crate::runtime::CloudRuntime).
//!
//! Each tick performs at most one state transition and drains the messages
//! the transport received since the previous tick. Nothing blocks: a
//! collaborator that is not ready reports failure and the state machine
//! retries on a later tick.

mod event;
mod options;
pub mod reserved;
mod retransmit;
mod session;
mod state;

pub use event::{CloudEvent, EVENT_QUEUE_DEPTH};
pub use options::{CloudOptions, Identifier, MAX_ADDRESS_LEN, MAX_ID_LEN, RetryConfig};
pub use state::State;

use reserved::{
    LIB_VERSION, OTA_CAP, OTA_ERROR, OTA_REQ, OTA_SHA256, OTA_URL, THING_ID, TZ_DST_UNTIL,
    TZ_OFFSET,
};
use retransmit::RetransmitBuffer;
use session::Session;

use crate::error::CloudError;
use crate::ota::{ConfirmCallback, OtaError, OtaGate};
use crate::property::{Property, PropertyContainer, PropertyValue, SyncPolicy};
use crate::topics;
use crate::transport::{Clock, CloudTransport, FirmwareUpdater, NoUpdater};

/// Property synchronization client.
///
/// - `MAX_PROPS`: capacity of each property container.
/// - `BUF_SIZE`: size of the encode buffer and of the retransmit buffer.
pub struct CloudClient<
    T,
    C,
    U = NoUpdater,
    const MAX_PROPS: usize = 16,
    const BUF_SIZE: usize = 256,
> where
    T: CloudTransport,
    C: Clock,
    U: FirmwareUpdater,
{
    transport: T,
    clock: C,
    updater: Option<U>,
    options: CloudOptions,
    ota_gate: OtaGate,
    configured: bool,
    running: bool,
    session: Session<MAX_PROPS>,
    retransmit: RetransmitBuffer<BUF_SIZE>,
    scratch: [u8; BUF_SIZE],
}

impl<T, C, const MAX_PROPS: usize, const BUF_SIZE: usize>
    CloudClient<T, C, NoUpdater, MAX_PROPS, BUF_SIZE>
where
    T: CloudTransport,
    C: Clock,
{
    /// Creates a client without firmware update support.
    pub fn new(transport: T, clock: C, options: CloudOptions) -> Self {
        Self::build(transport, clock, None, options)
    }
}

impl<T, C, U, const MAX_PROPS: usize, const BUF_SIZE: usize> CloudClient<T, C, U, MAX_PROPS, BUF_SIZE>
where
    T: CloudTransport,
    C: Clock,
    U: FirmwareUpdater,
{
    /// Creates a client that applies cloud-requested firmware updates with `updater`.
    pub fn with_updater(transport: T, clock: C, updater: U, options: CloudOptions) -> Self {
        Self::build(transport, clock, Some(updater), options)
    }

    fn build(transport: T, clock: C, updater: Option<U>, options: CloudOptions) -> Self {
        Self {
            transport,
            clock,
            updater,
            ota_gate: OtaGate::new(options.ask_before_ota),
            options,
            configured: false,
            running: false,
            session: Session::new(),
            retransmit: RetransmitBuffer::default(),
            scratch: [0; BUF_SIZE],
        }
    }

    /// Registers the reserved properties, derives the device topics and starts
    /// the connection lifecycle. After [`stop`](Self::stop) it restarts the
    /// lifecycle with the existing registrations.
    pub fn begin(&mut self) -> Result<(), CloudError> {
        if self.running {
            return Err(CloudError::AlreadyStarted);
        }
        if !self.configured {
            self.configure()?;
            self.configured = true;
        }
        self.session.state = State::ConnectPhy;
        self.running = true;
        info!(
            "cloud client started for device '{}'",
            self.options.device_id.as_str()
        );
        Ok(())
    }

    fn configure(&mut self) -> Result<(), CloudError> {
        self.session.device_topics = topics::device_topics(&self.options.device_id)?;

        let device = &mut self.session.device;
        device.register_all([
            Property::new(LIB_VERSION, PropertyValue::text(env!("CARGO_PKG_VERSION"))?),
            Property::new(OTA_CAP, self.updater.is_some()),
            Property::new(OTA_ERROR, OtaError::None as i64),
            Property::new(
                OTA_SHA256,
                PropertyValue::text(&self.options.firmware_sha256)?,
            ),
            Property::new(OTA_URL, PropertyValue::text("")?).read_write(),
            Property::new(OTA_REQ, false).read_write(),
            Property::new(THING_ID, PropertyValue::text(&self.options.thing_id)?).read_write(),
        ])?;
        // Device properties go out on request, not because they were just registered.
        device.clear_dirty();

        self.session.thing.register_all([
            Property::new(TZ_OFFSET, 0i64)
                .read_write()
                .on_sync(SyncPolicy::CloudWins),
            Property::new(TZ_DST_UNTIL, 0i64)
                .read_write()
                .on_sync(SyncPolicy::CloudWins),
        ])?;

        if !self.options.thing_id.is_empty() {
            self.session.thing_id_outdated = true;
        }
        Ok(())
    }

    /// Tears the broker session down. [`begin`](Self::begin) starts over.
    pub fn stop(&mut self) {
        if !self.running {
            return;
        }
        if self.session.attached {
            self.session.events.emit(CloudEvent::Disconnect);
        }
        self.transport.stop();
        self.session.reset_connection();
        self.session.state = State::ConnectPhy;
        self.running = false;
        info!("cloud client stopped");
    }

    /// Advances the lifecycle by at most one transition, then drains inbound
    /// messages. Returns the state after the tick.
    pub fn tick(&mut self) -> State {
        if !self.running {
            return self.session.state;
        }

        let next = match self.session.pending_state.take() {
            Some(state) => state,
            None => self.step(),
        };
        if next != self.session.state {
            debug!("state {:?} -> {:?}", self.session.state, next);
            self.session.state = next;
        }

        if self.transport.connected() {
            self.transport.poll(&mut self.session);
        }
        self.session.state
    }

    /// Between [`begin`](Self::begin) and [`stop`](Self::stop).
    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn state(&self) -> State {
        self.session.state
    }

    /// Attached to a thing with the last values applied.
    pub fn is_connected(&self) -> bool {
        self.session.state == State::Connected
    }

    /// Assigns the thing id locally, for devices with a compiled-in thing.
    pub fn set_thing_id(&mut self, thing_id: &str) -> Result<(), CloudError> {
        self.options.thing_id.clear();
        self.options
            .thing_id
            .push_str(thing_id)
            .map_err(|_| CloudError::IdentifierTooLong)?;
        if self.configured {
            self.session
                .device
                .set(THING_ID, PropertyValue::text(thing_id)?)?;
            // Local assignment, nothing to report to the cloud.
            if let Some(index) = self.session.device.index_of(THING_ID) {
                self.session.device.drop_change_at(index);
            }
        }
        self.session.thing_id_outdated = true;
        Ok(())
    }

    pub fn thing_id(&self) -> &str {
        if self.configured {
            self.session.thing_id()
        } else {
            &self.options.thing_id
        }
    }

    pub fn device_id(&self) -> &str {
        &self.options.device_id
    }

    /// Posix time shifted by the timezone offset received from the cloud.
    pub fn local_time(&self) -> i64 {
        i64::from(self.clock.posix_time()) + self.session.timezone.offset
    }

    /// Registers an application property in the thing container.
    pub fn register(&mut self, property: Property) -> Result<usize, CloudError> {
        Ok(self.session.thing.register(property)?)
    }

    pub fn thing_properties(&self) -> &PropertyContainer<MAX_PROPS> {
        &self.session.thing
    }

    pub fn thing_properties_mut(&mut self) -> &mut PropertyContainer<MAX_PROPS> {
        &mut self.session.thing
    }

    pub fn device_properties(&self) -> &PropertyContainer<MAX_PROPS> {
        &self.session.device
    }

    /// Registers `callback` for `event`, replacing any previous one.
    pub fn on_event(&mut self, event: CloudEvent, callback: fn()) {
        self.session.events.set_callback(event, callback);
    }

    /// Pops the oldest undelivered lifecycle event.
    pub fn next_event(&mut self) -> Option<CloudEvent> {
        self.session.events.next()
    }

    /// Hook consulted before applying an update when the options ask for confirmation.
    pub fn set_ota_confirmation(&mut self, confirm: ConfirmCallback) {
        self.ota_gate.set_confirmation(confirm);
    }

    pub fn options(&self) -> &CloudOptions {
        &self.options
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn clock_mut(&mut self) -> &mut C {
        &mut self.clock
    }

    pub fn print_debug_info(&self) {
        info!("***** cloud configuration *****");
        info!("device id: {}", self.options.device_id.as_str());
        info!("thing id: {}", self.thing_id());
        info!(
            "broker: {}:{}",
            self.options.broker_address.as_str(),
            self.options.broker_port
        );
    }
}
