use std::time::Duration;
use serde::{Deserialize, Serialize};

use crate::device::constants::{CONNECT_DEADLINE, SCAN_DEADLINE, SCAN_START_DELAY};
use crate::sim::types::SimPeripheral;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub auto_scan: bool,
    pub scan_start_delay_ms: u64,
    pub scan_deadline_ms: u64,
    pub connect_deadline_ms: u64,
    pub last_device_name: Option<String>,
    pub peripherals: Vec<SimPeripheral>,
}

impl Config {
    pub fn scan_start_delay(&self) -> Duration {
        Duration::from_millis(self.scan_start_delay_ms)
    }

    // a deadline of zero means the watchdog is disabled
    pub fn scan_deadline(&self) -> Option<Duration> {
        match self.scan_deadline_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    pub fn connect_deadline(&self) -> Option<Duration> {
        match self.connect_deadline_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            auto_scan: true,
            scan_start_delay_ms: SCAN_START_DELAY,
            scan_deadline_ms: SCAN_DEADLINE,
            connect_deadline_ms: CONNECT_DEADLINE,
            last_device_name: None,
            peripherals: vec![
                SimPeripheral {
                    name: "LumiPanel-L1".to_string(),
                    rssi: -48,
                    connectable: true,
                    battery: 86,
                },
                SimPeripheral {
                    name: "LumiPanel-L1-Pro".to_string(),
                    rssi: -62,
                    connectable: true,
                    battery: 54,
                },
                SimPeripheral {
                    name: "GimbalGo-G2".to_string(),
                    rssi: -71,
                    connectable: false,
                    battery: 100,
                },
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_parses_to_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn partial_document_keeps_remaining_defaults() {
        let config: Config = serde_json::from_str(r#"{"autoScan": false, "connectDeadlineMs": 0}"#).unwrap();

        assert!(!config.auto_scan);
        assert_eq!(config.connect_deadline(), None);
        assert_eq!(config.scan_start_delay_ms, SCAN_START_DELAY);
        assert_eq!(config.peripherals, Config::default().peripherals);
    }

    #[test]
    fn roster_entry_fields_have_defaults() {
        let config: Config = serde_json::from_str(
            r#"{"peripherals": [{"name": "Lamp-A", "rssi": -60}]}"#,
        ).unwrap();

        assert_eq!(config.peripherals, vec![SimPeripheral {
            name: "Lamp-A".to_string(),
            rssi: -60,
            connectable: true,
            battery: 100,
        }]);
    }
}
