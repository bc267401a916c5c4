use std::time::Duration;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

fn connectable_default() -> bool {
    true
}

fn battery_default() -> u8 {
    100
}

/**
 * One simulated peripheral. The roster of these is part of the config file,
 * so the set of devices the driver "sees" can be changed without a rebuild.
 */
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimPeripheral {
    pub name: String,
    pub rssi: i16,

    // a peripheral that refuses connections reports a failure instead of
    // a connection
    #[serde(default = "connectable_default")]
    pub connectable: bool,

    #[serde(default = "battery_default")]
    pub battery: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverCommand {
    StartScan,
    StopScan,
    Connect(String),
    Write { characteristic: Uuid, value: Vec<u8> },
    ReadBattery,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverEvent {
    Discovered { name: String, rssi: i16 },
    Connected(String),
    DisconnectedOrFailed(String),
    ServicesDiscovered(String),
    BatteryLevel { name: String, percent: u8 },
}

/**
 * How long the simulated radio takes for each step. Grouped so that tests can
 * run the driver without any delay.
 */
#[derive(Debug, Clone, Copy)]
pub struct SimTiming {
    pub discover_interval: Duration,
    pub connect_latency: Duration,
    pub service_latency: Duration,
    pub read_latency: Duration,
}

impl Default for SimTiming {
    fn default() -> Self {
        SimTiming {
            discover_interval: Duration::from_millis(400),
            connect_latency: Duration::from_millis(600),
            service_latency: Duration::from_millis(500),
            read_latency: Duration::from_millis(150),
        }
    }
}

impl SimTiming {
    #[cfg(test)]
    pub fn immediate() -> Self {
        SimTiming {
            discover_interval: Duration::ZERO,
            connect_latency: Duration::ZERO,
            service_latency: Duration::ZERO,
            read_latency: Duration::ZERO,
        }
    }
}
