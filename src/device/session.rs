use std::convert::Infallible;
use iced::subscription::{self, Subscription};
use futures::{StreamExt, SinkExt};
use futures::channel::mpsc::{channel, Sender};
use indexmap::IndexMap;
use log::{debug, info, warn};
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use crate::config::types::Config;
use crate::device::constants::{make_light_output_uuid, OUTPUT_OFF, OUTPUT_ON};
use crate::device::types::{ConnectionState, DeviceEntry, SessionCommand, SessionEvent, SessionHandle};
use crate::sim::peripheral_sim::peripheral_sim;
use crate::sim::types::{DriverCommand, DriverEvent, SimTiming};

/**
 * The connection session: the current connection state plus the list of
 * devices discovered during the scanning phase. Driver callbacks are applied
 * unconditionally, in the order they arrive; the most recently processed
 * callback determines the state.
 */
pub struct Session {
    state: ConnectionState,
    devices: IndexMap<String, DeviceEntry>,
}

impl Session {
    pub fn new() -> Self {
        Session {
            state: ConnectionState::Disconnected,
            devices: IndexMap::new(),
        }
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn device_entries(&self) -> Vec<DeviceEntry> {
        self.devices.values().cloned().collect()
    }

    pub fn begin_scan(&mut self) {
        self.state = ConnectionState::Scanning;
    }

    // only used by the scan watchdog
    pub fn cancel_scan(&mut self) {
        self.state = ConnectionState::Disconnected;
    }

    pub fn begin_connect(&mut self, name: &str) {
        self.state = ConnectionState::Connecting(name.to_string());
    }

    // The device name is the identity; names sharing a prefix are distinct
    // devices. Re-discovery of a listed name is a no-op.
    pub fn record_discovery(&mut self, name: &str, rssi: i16) -> bool {
        if self.devices.contains_key(name) {
            return false;
        }

        self.devices.insert(name.to_string(), DeviceEntry {
            name: name.to_string(),
            rssi,
        });
        true
    }

    pub fn complete_connect(&mut self, name: &str) {
        self.state = ConnectionState::Connected(name.to_string());
        self.devices.clear();
    }

    pub fn fail(&mut self, name: &str) {
        self.state = ConnectionState::Failed(name.to_string());
    }

    pub fn services_ready(&mut self, name: &str) {
        self.state = ConnectionState::ServicesReady(name.to_string());
    }

    // The gate for the light output lives here, not in the view: a write
    // command is produced only once service discovery has completed.
    pub fn output_command(&self, on: bool) -> Option<DriverCommand> {
        match self.state {
            ConnectionState::ServicesReady(_) => {
                let value = if on { OUTPUT_ON } else { OUTPUT_OFF };
                Some(DriverCommand::Write {
                    characteristic: make_light_output_uuid(),
                    value: value.to_vec(),
                })
            },
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Timer {
    ScanStart,
    ScanDeadline,
    ConnectDeadline,
}

async fn timer_due(at: Option<Instant>) {
    match at {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}

async fn publish(senders: &mut Vec<Sender<SessionEvent>>, event: SessionEvent) {
    for sender in senders {
        sender.send(event.clone()).await.expect("Failed to send SessionEvent");
    }
}

async fn publish_state(
    senders: &mut Vec<Sender<SessionEvent>>,
    session: &Session,
    published: &mut ConnectionState,
) {
    if *session.state() != *published {
        *published = session.state().clone();
        publish(senders, SessionEvent::StateChange(published.clone())).await;
    }
}

pub async fn run_session(cancel: CancellationToken, config: Config, senders: Vec<Sender<SessionEvent>>) {
    run_session_with(cancel, config, SimTiming::default(), senders).await
}

pub async fn run_session_with(
    cancel: CancellationToken,
    config: Config,
    timing: SimTiming,
    mut senders: Vec<Sender<SessionEvent>>,
) {
    let (driver_event_tx, mut driver_events) = channel::<DriverEvent>(64);
    let (mut driver, driver_handle) = peripheral_sim(
        cancel.clone(),
        config.peripherals.clone(),
        timing,
        vec![driver_event_tx],
    );

    let (command_tx, mut commands) = channel::<SessionCommand>(16);
    publish(&mut senders, SessionEvent::Ready(SessionHandle::new(command_tx.clone()))).await;

    let mut session = Session::new();
    let mut published = session.state().clone();
    let mut timer: Option<(Timer, Instant)> = None;

    if config.auto_scan {
        info!("Scanning on startup");
        session.begin_scan();
        publish_state(&mut senders, &session, &mut published).await;
        timer = Some((Timer::ScanStart, Instant::now() + config.scan_start_delay()));
    }

    'mainloop: loop {
        let due = timer.map(|(_, at)| at);

        tokio::select! {
            _ = cancel.cancelled() => {
                break 'mainloop;
            },
            Some(command) = commands.next() => {
                match command {
                    SessionCommand::StartScan => {
                        info!("Scan requested");
                        session.begin_scan();
                        publish_state(&mut senders, &session, &mut published).await;
                        timer = Some((Timer::ScanStart, Instant::now() + config.scan_start_delay()));
                    },
                    SessionCommand::Connect(name) => {
                        info!("Connect requested: {}", name);
                        session.begin_connect(&name);
                        publish_state(&mut senders, &session, &mut published).await;
                        driver.send(DriverCommand::Connect(name)).await.expect("Failed to send DriverCommand");
                        timer = config.connect_deadline()
                            .map(|deadline| (Timer::ConnectDeadline, Instant::now() + deadline));
                    },
                    SessionCommand::SetOutput(on) => {
                        match session.output_command(on) {
                            Some(write) => {
                                debug!("Light output write: {}", on);
                                driver.send(write).await.expect("Failed to send DriverCommand");
                            },
                            None => {
                                warn!("Output toggle rejected, services are not ready");
                                publish(&mut senders, SessionEvent::OutputRejected { requested: on }).await;
                            },
                        }
                    },
                }
            },
            Some(event) = driver_events.next() => {
                match event {
                    DriverEvent::Discovered { name, rssi } => {
                        if session.record_discovery(&name, rssi) {
                            debug!("Discovered {} ({} dBm)", name, rssi);
                            publish(&mut senders, SessionEvent::DeviceListChange(session.device_entries())).await;
                        }
                    },
                    DriverEvent::Connected(name) => {
                        info!("Connected to {}", name);
                        session.complete_connect(&name);
                        timer = None;
                        driver.send(DriverCommand::StopScan).await.expect("Failed to send DriverCommand");
                        publish_state(&mut senders, &session, &mut published).await;
                        publish(&mut senders, SessionEvent::DeviceListChange(session.device_entries())).await;
                    },
                    DriverEvent::DisconnectedOrFailed(name) => {
                        warn!("Disconnected or failed to connect: {}", name);
                        session.fail(&name);
                        timer = None;
                        publish_state(&mut senders, &session, &mut published).await;
                    },
                    DriverEvent::ServicesDiscovered(name) => {
                        info!("Services discovered for {}", name);
                        session.services_ready(&name);
                        publish_state(&mut senders, &session, &mut published).await;
                        driver.send(DriverCommand::ReadBattery).await.expect("Failed to send DriverCommand");
                    },
                    DriverEvent::BatteryLevel { name, percent } => {
                        debug!("Battery level of {}: {}%", name, percent);
                        publish(&mut senders, SessionEvent::Battery(percent)).await;
                    },
                }
            },
            _ = timer_due(due), if due.is_some() => {
                if let Some((kind, _)) = timer.take() {
                    match kind {
                        Timer::ScanStart => {
                            driver.send(DriverCommand::StartScan).await.expect("Failed to send DriverCommand");
                            timer = config.scan_deadline()
                                .map(|deadline| (Timer::ScanDeadline, Instant::now() + deadline));
                        },
                        Timer::ScanDeadline => {
                            if *session.state() == ConnectionState::Scanning {
                                warn!("Scan watchdog expired");
                                driver.send(DriverCommand::StopScan).await.expect("Failed to send DriverCommand");
                                session.cancel_scan();
                                publish_state(&mut senders, &session, &mut published).await;
                            }
                        },
                        Timer::ConnectDeadline => {
                            if let ConnectionState::Connecting(name) = session.state().clone() {
                                warn!("Connect watchdog expired for {}", name);
                                session.fail(&name);
                                publish_state(&mut senders, &session, &mut published).await;
                            }
                        },
                    }
                }
            },
        }
    }

    info!("Waiting for peripheral sim task to stop");
    driver_handle.await.expect("Failed to join peripheral sim task");
}

pub fn session_subscription(cancel: CancellationToken, config: Config) -> Subscription<SessionEvent> {
    struct SessionLoop;

    subscription::channel(
        std::any::TypeId::of::<SessionLoop>(),
        64,
        move |subscription_sender| {
            let cancel = cancel.clone();
            let config = config.clone();

            async move {
                run_session(cancel, config, vec![subscription_sender]).await;

                // note: subscription::channel expects a future that never resolves
                std::future::pending::<Infallible>().await
            }
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::mpsc::Receiver;
    use tokio::time::{timeout, Duration};

    use crate::sim::types::SimPeripheral;

    fn light_panel() -> SimPeripheral {
        SimPeripheral {
            name: "LumiPanel-L1".to_string(),
            rssi: -48,
            connectable: true,
            battery: 86,
        }
    }

    fn busy_gimbal() -> SimPeripheral {
        SimPeripheral {
            name: "GimbalGo-G2".to_string(),
            rssi: -71,
            connectable: false,
            battery: 100,
        }
    }

    fn test_config(peripherals: Vec<SimPeripheral>) -> Config {
        Config {
            auto_scan: false,
            scan_start_delay_ms: 0,
            scan_deadline_ms: 0,
            connect_deadline_ms: 0,
            last_device_name: None,
            peripherals,
        }
    }

    async fn next_event(events: &mut Receiver<SessionEvent>) -> SessionEvent {
        timeout(Duration::from_secs(1), events.next())
            .await
            .expect("Timed out waiting for a session event")
            .expect("Session event stream ended")
    }

    async fn expect_ready(events: &mut Receiver<SessionEvent>) -> SessionHandle {
        match next_event(events).await {
            SessionEvent::Ready(handle) => handle,
            other => panic!("expected Ready, got {:?}", other),
        }
    }

    async fn expect_state(events: &mut Receiver<SessionEvent>, expected: ConnectionState) {
        match next_event(events).await {
            SessionEvent::StateChange(state) => assert_eq!(state, expected),
            other => panic!("expected StateChange, got {:?}", other),
        }
    }

    async fn expect_devices(events: &mut Receiver<SessionEvent>, expected: Vec<DeviceEntry>) {
        match next_event(events).await {
            SessionEvent::DeviceListChange(devices) => assert_eq!(devices, expected),
            other => panic!("expected DeviceListChange, got {:?}", other),
        }
    }

    #[test]
    fn callbacks_apply_last_write_wins() {
        let mut session = Session::new();
        assert_eq!(*session.state(), ConnectionState::Disconnected);

        session.begin_scan();
        assert_eq!(*session.state(), ConnectionState::Scanning);

        session.begin_connect("LumiPanel-L1");
        assert_eq!(*session.state(), ConnectionState::Connecting("LumiPanel-L1".to_string()));

        session.complete_connect("LumiPanel-L1");
        assert_eq!(*session.state(), ConnectionState::Connected("LumiPanel-L1".to_string()));

        session.services_ready("LumiPanel-L1");
        assert_eq!(*session.state(), ConnectionState::ServicesReady("LumiPanel-L1".to_string()));

        session.fail("LumiPanel-L1");
        assert_eq!(*session.state(), ConnectionState::Failed("LumiPanel-L1".to_string()));
    }

    #[test]
    fn out_of_order_callbacks_are_accepted() {
        // the driver is trusted: whatever it reports becomes the state,
        // even straight from Disconnected
        let mut session = Session::new();

        session.services_ready("Lamp");
        assert_eq!(*session.state(), ConnectionState::ServicesReady("Lamp".to_string()));

        session.complete_connect("Other");
        assert_eq!(*session.state(), ConnectionState::Connected("Other".to_string()));

        session.fail("Third");
        assert_eq!(*session.state(), ConnectionState::Failed("Third".to_string()));
    }

    #[test]
    fn discovery_dedup_is_exact_identity() {
        let mut session = Session::new();

        assert!(session.record_discovery("Lamp-A", -60));
        assert!(!session.record_discovery("Lamp-A", -55));

        // a name containing a listed name as prefix is a different device
        assert!(session.record_discovery("Lamp-A-2", -70));
        assert!(session.record_discovery("Torch", -80));

        let entries = session.device_entries();
        assert_eq!(entries, vec![
            DeviceEntry { name: "Lamp-A".to_string(), rssi: -60 },
            DeviceEntry { name: "Lamp-A-2".to_string(), rssi: -70 },
            DeviceEntry { name: "Torch".to_string(), rssi: -80 },
        ]);
    }

    #[test]
    fn connected_clears_device_list() {
        let mut session = Session::new();
        session.record_discovery("Lamp-A", -60);
        session.record_discovery("Torch", -80);

        session.complete_connect("Lamp-A");

        assert!(session.device_entries().is_empty());
        assert_eq!(*session.state(), ConnectionState::Connected("Lamp-A".to_string()));
    }

    #[test]
    fn output_gate_only_open_when_services_ready() {
        let mut session = Session::new();
        assert_eq!(session.output_command(true), None);

        session.begin_scan();
        assert_eq!(session.output_command(true), None);

        session.begin_connect("Lamp-A");
        assert_eq!(session.output_command(true), None);

        session.complete_connect("Lamp-A");
        assert_eq!(session.output_command(true), None);

        session.services_ready("Lamp-A");
        assert_eq!(session.output_command(true), Some(DriverCommand::Write {
            characteristic: make_light_output_uuid(),
            value: vec![0x01],
        }));
        assert_eq!(session.output_command(false), Some(DriverCommand::Write {
            characteristic: make_light_output_uuid(),
            value: vec![0x00],
        }));

        session.fail("Lamp-A");
        assert_eq!(session.output_command(true), None);
    }

    #[tokio::test]
    async fn full_flow_reaches_services_ready_and_reads_battery() {
        let cancel = CancellationToken::new();
        let (event_tx, mut events) = channel(64);
        let task = tokio::spawn(run_session_with(
            cancel.clone(),
            test_config(vec![light_panel()]),
            SimTiming::immediate(),
            vec![event_tx],
        ));

        let mut handle = expect_ready(&mut events).await;

        handle.send(SessionCommand::StartScan).await;
        expect_state(&mut events, ConnectionState::Scanning).await;
        expect_devices(&mut events, vec![DeviceEntry { name: "LumiPanel-L1".to_string(), rssi: -48 }]).await;

        handle.send(SessionCommand::Connect("LumiPanel-L1".to_string())).await;
        expect_state(&mut events, ConnectionState::Connecting("LumiPanel-L1".to_string())).await;
        expect_state(&mut events, ConnectionState::Connected("LumiPanel-L1".to_string())).await;
        expect_devices(&mut events, vec![]).await;
        expect_state(&mut events, ConnectionState::ServicesReady("LumiPanel-L1".to_string())).await;

        match next_event(&mut events).await {
            SessionEvent::Battery(percent) => assert_eq!(percent, 86),
            other => panic!("expected Battery, got {:?}", other),
        }

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn auto_scan_starts_without_a_command() {
        let cancel = CancellationToken::new();
        let (event_tx, mut events) = channel(64);
        let mut config = test_config(vec![light_panel()]);
        config.auto_scan = true;
        let task = tokio::spawn(run_session_with(cancel.clone(), config, SimTiming::immediate(), vec![event_tx]));

        expect_ready(&mut events).await;
        expect_state(&mut events, ConnectionState::Scanning).await;
        expect_devices(&mut events, vec![DeviceEntry { name: "LumiPanel-L1".to_string(), rssi: -48 }]).await;

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn output_toggle_outside_ready_state_is_rejected() {
        let cancel = CancellationToken::new();
        let (event_tx, mut events) = channel(64);
        let task = tokio::spawn(run_session_with(
            cancel.clone(),
            test_config(vec![light_panel()]),
            SimTiming::immediate(),
            vec![event_tx],
        ));

        let mut handle = expect_ready(&mut events).await;

        handle.send(SessionCommand::SetOutput(true)).await;
        match next_event(&mut events).await {
            SessionEvent::OutputRejected { requested } => assert!(requested),
            other => panic!("expected OutputRejected, got {:?}", other),
        }

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn failed_connection_is_reported() {
        let cancel = CancellationToken::new();
        let (event_tx, mut events) = channel(64);
        let task = tokio::spawn(run_session_with(
            cancel.clone(),
            test_config(vec![busy_gimbal()]),
            SimTiming::immediate(),
            vec![event_tx],
        ));

        let mut handle = expect_ready(&mut events).await;

        handle.send(SessionCommand::Connect("GimbalGo-G2".to_string())).await;
        expect_state(&mut events, ConnectionState::Connecting("GimbalGo-G2".to_string())).await;
        expect_state(&mut events, ConnectionState::Failed("GimbalGo-G2".to_string())).await;

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn connect_watchdog_reports_failure_for_silent_driver() {
        let cancel = CancellationToken::new();
        let (event_tx, mut events) = channel(64);
        let mut config = test_config(vec![]);
        config.connect_deadline_ms = 40;
        let task = tokio::spawn(run_session_with(cancel.clone(), config, SimTiming::immediate(), vec![event_tx]));

        let mut handle = expect_ready(&mut events).await;

        handle.send(SessionCommand::Connect("Ghost".to_string())).await;
        expect_state(&mut events, ConnectionState::Connecting("Ghost".to_string())).await;
        expect_state(&mut events, ConnectionState::Failed("Ghost".to_string())).await;

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn scan_watchdog_returns_to_disconnected() {
        let cancel = CancellationToken::new();
        let (event_tx, mut events) = channel(64);
        let mut config = test_config(vec![]);
        config.scan_deadline_ms = 40;
        let task = tokio::spawn(run_session_with(cancel.clone(), config, SimTiming::immediate(), vec![event_tx]));

        let mut handle = expect_ready(&mut events).await;

        handle.send(SessionCommand::StartScan).await;
        expect_state(&mut events, ConnectionState::Scanning).await;
        expect_state(&mut events, ConnectionState::Disconnected).await;

        cancel.cancel();
        task.await.unwrap();
    }
}
