use std::collections::VecDeque;
use futures::channel::mpsc::{channel, Sender};
use futures::{StreamExt, SinkExt};
use log::{debug, warn};
use tokio::spawn;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use crate::device::constants::make_light_output_uuid;
use crate::sim::types::{DriverCommand, DriverEvent, SimPeripheral, SimTiming};

// The queue is kept ordered by due time; connect replies may become due
// before discoveries that were scheduled earlier.
fn schedule(queue: &mut VecDeque<(Instant, DriverEvent)>, at: Instant, event: DriverEvent) {
    let index = queue.partition_point(|(due, _)| *due <= at);
    queue.insert(index, (at, event));
}

async fn next_due(at: Option<Instant>) {
    match at {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}

pub fn peripheral_sim(
    cancel: CancellationToken,
    roster: Vec<SimPeripheral>,
    timing: SimTiming,
    mut senders: Vec<Sender<DriverEvent>>,
) -> (Sender<DriverCommand>, JoinHandle<()>) {
    let (tx, mut rx) = channel::<DriverCommand>(32);
    let light_output_uuid = make_light_output_uuid();

    let handle = spawn(async move {
        let mut scanning = false;
        let mut connected: Option<String> = None;
        let mut queue: VecDeque<(Instant, DriverEvent)> = VecDeque::new();

        'mainloop: loop {
            let due = queue.front().map(|(at, _)| *at);

            tokio::select! {
                _ = cancel.cancelled() => {
                    break 'mainloop;
                },
                Some(command) = rx.next() => {
                    match command {
                        DriverCommand::StartScan => {
                            // a scan that is already running is left alone
                            if !scanning {
                                debug!("Scan started");
                                scanning = true;
                                let now = Instant::now();
                                for (index, peripheral) in roster.iter().enumerate() {
                                    let at = now + timing.discover_interval * (index as u32 + 1);
                                    schedule(&mut queue, at, DriverEvent::Discovered {
                                        name: peripheral.name.clone(),
                                        rssi: peripheral.rssi,
                                    });
                                }
                            }
                        },
                        DriverCommand::StopScan => {
                            debug!("Scan stopped");
                            scanning = false;
                            queue.retain(|(_, event)| !matches!(event, DriverEvent::Discovered { .. }));
                        },
                        DriverCommand::Connect(name) => {
                            let now = Instant::now();
                            match roster.iter().find(|peripheral| peripheral.name == name) {
                                Some(peripheral) if peripheral.connectable => {
                                    schedule(&mut queue, now + timing.connect_latency, DriverEvent::Connected(name.clone()));
                                    schedule(
                                        &mut queue,
                                        now + timing.connect_latency + timing.service_latency,
                                        DriverEvent::ServicesDiscovered(name),
                                    );
                                },
                                Some(_) => {
                                    schedule(&mut queue, now + timing.connect_latency, DriverEvent::DisconnectedOrFailed(name));
                                },
                                None => {
                                    // an unknown target never answers; the consumer's
                                    // watchdog has to deal with that
                                    debug!("Connect requested for unknown peripheral {}", name);
                                },
                            }
                        },
                        DriverCommand::Write { characteristic, value } => {
                            if connected.is_none() {
                                warn!("Write to {} ignored, no peripheral is connected", characteristic);
                            } else if characteristic == light_output_uuid {
                                let on = value.first().map(|byte| *byte != 0).unwrap_or(false);
                                debug!("Light output set to {}", if on { "on" } else { "off" });
                            } else {
                                warn!("Write to unknown characteristic {}: {:02x?}", characteristic, value);
                            }
                        },
                        DriverCommand::ReadBattery => {
                            match &connected {
                                Some(name) => {
                                    let percent = roster.iter()
                                        .find(|peripheral| peripheral.name == *name)
                                        .map(|peripheral| peripheral.battery)
                                        .unwrap_or(0);
                                    schedule(&mut queue, Instant::now() + timing.read_latency, DriverEvent::BatteryLevel {
                                        name: name.clone(),
                                        percent,
                                    });
                                },
                                None => {
                                    warn!("Battery read ignored, no peripheral is connected");
                                },
                            }
                        },
                    }
                },
                _ = next_due(due), if due.is_some() => {
                    if let Some((_, event)) = queue.pop_front() {
                        match &event {
                            DriverEvent::Connected(name) => {
                                connected = Some(name.clone());
                            },
                            DriverEvent::DisconnectedOrFailed(_) => {
                                connected = None;
                            },
                            _ => {},
                        }

                        for sender in &mut senders {
                            sender.send(event.clone()).await.expect("Failed to send DriverEvent");
                        }
                    }
                },
            }
        }
    });

    return (tx, handle);
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::mpsc::Receiver;
    use tokio::time::{timeout, Duration};

    fn roster() -> Vec<SimPeripheral> {
        vec![
            SimPeripheral {
                name: "LumiPanel-L1".to_string(),
                rssi: -48,
                connectable: true,
                battery: 86,
            },
            SimPeripheral {
                name: "GimbalGo-G2".to_string(),
                rssi: -71,
                connectable: false,
                battery: 100,
            },
        ]
    }

    async fn next_event(events: &mut Receiver<DriverEvent>) -> DriverEvent {
        timeout(Duration::from_secs(1), events.next())
            .await
            .expect("Timed out waiting for a driver event")
            .expect("Driver event stream ended")
    }

    async fn expect_silence(events: &mut Receiver<DriverEvent>) {
        let result = timeout(Duration::from_millis(120), events.next()).await;
        assert!(result.is_err(), "expected no driver event, got {:?}", result);
    }

    #[tokio::test]
    async fn scan_reports_every_peripheral_in_roster_order() {
        let cancel = CancellationToken::new();
        let (event_tx, mut events) = channel(32);
        let (mut commands, handle) = peripheral_sim(cancel.clone(), roster(), SimTiming::immediate(), vec![event_tx]);

        commands.send(DriverCommand::StartScan).await.unwrap();

        assert_eq!(next_event(&mut events).await, DriverEvent::Discovered {
            name: "LumiPanel-L1".to_string(),
            rssi: -48,
        });
        assert_eq!(next_event(&mut events).await, DriverEvent::Discovered {
            name: "GimbalGo-G2".to_string(),
            rssi: -71,
        });

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn stop_scan_drops_pending_discoveries() {
        let cancel = CancellationToken::new();
        let (event_tx, mut events) = channel(32);
        let timing = SimTiming {
            discover_interval: Duration::from_millis(50),
            ..SimTiming::immediate()
        };
        let (mut commands, handle) = peripheral_sim(cancel.clone(), roster(), timing, vec![event_tx]);

        commands.send(DriverCommand::StartScan).await.unwrap();
        commands.send(DriverCommand::StopScan).await.unwrap();

        expect_silence(&mut events).await;

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn connect_reports_connection_then_services_then_battery() {
        let cancel = CancellationToken::new();
        let (event_tx, mut events) = channel(32);
        let (mut commands, handle) = peripheral_sim(cancel.clone(), roster(), SimTiming::immediate(), vec![event_tx]);

        commands.send(DriverCommand::Connect("LumiPanel-L1".to_string())).await.unwrap();

        assert_eq!(next_event(&mut events).await, DriverEvent::Connected("LumiPanel-L1".to_string()));
        assert_eq!(next_event(&mut events).await, DriverEvent::ServicesDiscovered("LumiPanel-L1".to_string()));

        commands.send(DriverCommand::ReadBattery).await.unwrap();

        assert_eq!(next_event(&mut events).await, DriverEvent::BatteryLevel {
            name: "LumiPanel-L1".to_string(),
            percent: 86,
        });

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn connect_to_refusing_peripheral_reports_failure() {
        let cancel = CancellationToken::new();
        let (event_tx, mut events) = channel(32);
        let (mut commands, handle) = peripheral_sim(cancel.clone(), roster(), SimTiming::immediate(), vec![event_tx]);

        commands.send(DriverCommand::Connect("GimbalGo-G2".to_string())).await.unwrap();

        assert_eq!(next_event(&mut events).await, DriverEvent::DisconnectedOrFailed("GimbalGo-G2".to_string()));

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn connect_to_unknown_name_stays_silent() {
        let cancel = CancellationToken::new();
        let (event_tx, mut events) = channel(32);
        let (mut commands, handle) = peripheral_sim(cancel.clone(), roster(), SimTiming::immediate(), vec![event_tx]);

        commands.send(DriverCommand::Connect("Ghost".to_string())).await.unwrap();

        expect_silence(&mut events).await;

        cancel.cancel();
        handle.await.unwrap();
    }
}
