use embassy_futures::select::{Either, select};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Ticker};

use super::events::CloudEventSender;
use crate::client::CloudClient;
use crate::error::CloudError;
use crate::transport::{Clock, CloudTransport, FirmwareUpdater};

/// Fired by any task to shut the runtime down.
pub type StopSignal = Signal<CriticalSectionRawMutex, ()>;

pub const DEFAULT_TICK_PERIOD: Duration = Duration::from_millis(100);

/// Drives a [`CloudClient`] from an Embassy task.
pub struct CloudRuntime<
    'a,
    T,
    C,
    U,
    const MAX_PROPS: usize,
    const BUF_SIZE: usize,
    const EVENTS: usize = 4,
> where
    T: CloudTransport,
    C: Clock,
    U: FirmwareUpdater,
{
    client: CloudClient<T, C, U, MAX_PROPS, BUF_SIZE>,
    stop: &'a StopSignal,
    events: Option<CloudEventSender<'a, EVENTS>>,
    period: Duration,
}

impl<'a, T, C, U, const MAX_PROPS: usize, const BUF_SIZE: usize, const EVENTS: usize>
    CloudRuntime<'a, T, C, U, MAX_PROPS, BUF_SIZE, EVENTS>
where
    T: CloudTransport,
    C: Clock,
    U: FirmwareUpdater,
{
    pub fn new(client: CloudClient<T, C, U, MAX_PROPS, BUF_SIZE>, stop: &'a StopSignal) -> Self {
        Self {
            client,
            stop,
            events: None,
            period: DEFAULT_TICK_PERIOD,
        }
    }

    /// Forwards lifecycle events to `sender`. Without a sender they stay in
    /// the client queue.
    pub fn with_events(mut self, sender: CloudEventSender<'a, EVENTS>) -> Self {
        self.events = Some(sender);
        self
    }

    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    pub fn client(&self) -> &CloudClient<T, C, U, MAX_PROPS, BUF_SIZE> {
        &self.client
    }

    pub fn client_mut(&mut self) -> &mut CloudClient<T, C, U, MAX_PROPS, BUF_SIZE> {
        &mut self.client
    }

    pub fn into_client(self) -> CloudClient<T, C, U, MAX_PROPS, BUF_SIZE> {
        self.client
    }

    /// Ticks the client every period until the stop signal fires.
    pub async fn run(&mut self) {
        match self.client.begin() {
            Ok(()) | Err(CloudError::AlreadyStarted) => {}
            Err(err) => {
                error!("cloud client failed to start: {:?}", err);
                return;
            }
        }

        let mut ticker = Ticker::every(self.period);
        loop {
            match select(ticker.next(), self.stop.wait()).await {
                Either::First(()) => self.tick_once(),
                Either::Second(()) => {
                    info!("cloud runtime stopping");
                    self.client.stop();
                    self.forward_events();
                    break;
                }
            }
        }
    }

    /// One client tick followed by event forwarding.
    pub fn tick_once(&mut self) {
        self.client.tick();
        self.forward_events();
    }

    fn forward_events(&mut self) {
        let Some(sender) = &self.events else {
            return;
        };
        while let Some(event) = self.client.next_event() {
            if sender.try_send(event).is_err() {
                warn!("event channel full, dropping {:?}", event);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use embassy_futures::block_on;
    use embassy_time::Instant;

    use super::*;
    use crate::client::{CloudEvent, CloudOptions};
    use crate::runtime::CloudEventChannel;
    use crate::transport::{MessageHandler, NoUpdater};

    /// Broker that accepts everything.
    #[derive(Default)]
    struct OpenBroker {
        connected: bool,
    }

    impl CloudTransport for OpenBroker {
        fn connect(&mut self, _address: &str, _port: u16) -> bool {
            self.connected = true;
            true
        }

        fn connected(&mut self) -> bool {
            self.connected
        }

        fn subscribe(&mut self, _topic: &str) -> bool {
            true
        }

        fn unsubscribe(&mut self, _topic: &str) -> bool {
            true
        }

        fn publish(&mut self, _topic: &str, _payload: &[u8]) -> bool {
            true
        }

        fn stop(&mut self) {
            self.connected = false;
        }

        fn poll(&mut self, _handler: &mut dyn MessageHandler) {}
    }

    struct FrozenClock;

    impl Clock for FrozenClock {
        fn now(&self) -> Instant {
            Instant::from_millis(0)
        }

        fn posix_time(&self) -> u32 {
            1_700_000_000
        }
    }

    type Client = CloudClient<OpenBroker, FrozenClock, NoUpdater, 8, 128>;

    fn client() -> Client {
        let options = CloudOptions::new("device", "broker", 8883)
            .unwrap()
            .with_thing_id("thing")
            .unwrap();
        CloudClient::new(OpenBroker::default(), FrozenClock, options)
    }

    #[test]
    fn events_reach_the_channel() {
        let channel = CloudEventChannel::<4>::new();
        let stop = StopSignal::new();
        let mut runtime = CloudRuntime::new(client(), &stop).with_events(channel.sender());
        runtime.client_mut().begin().unwrap();

        for _ in 0..20 {
            runtime.tick_once();
        }
        assert!(matches!(channel.try_receive(), Ok(CloudEvent::Connect)));
    }

    #[test]
    fn stop_signal_ends_run() {
        let stop = StopSignal::new();
        let mut runtime: CloudRuntime<'_, _, _, _, 8, 128> = CloudRuntime::new(client(), &stop);
        stop.signal(());
        block_on(runtime.run());

        let client = runtime.into_client();
        assert!(!client.is_running());
        assert!(!client.transport().connected);
    }
}
