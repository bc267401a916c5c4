use futures::channel::mpsc::Sender;
use futures::SinkExt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Scanning,
    Connecting(String),
    Connected(String),
    ServicesReady(String),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEntry {
    pub name: String,
    pub rssi: i16,
}

impl DeviceEntry {
    pub fn label(&self) -> String {
        format!("{} [{} dBm]", self.name, self.rssi)
    }
}

#[derive(Debug, Clone)]
pub enum SessionCommand {
    StartScan,
    Connect(String),
    SetOutput(bool),
}

#[derive(Debug, Clone)]
pub enum SessionEvent {
    Ready(SessionHandle),
    StateChange(ConnectionState),
    DeviceListChange(Vec<DeviceEntry>),
    Battery(u8),
    OutputRejected { requested: bool },
}

// Handed to the view through the first SessionEvent, so that everything the
// view does goes through the same command channel.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    sender: Sender<SessionCommand>,
}

impl SessionHandle {
    pub fn new(sender: Sender<SessionCommand>) -> Self {
        SessionHandle { sender }
    }

    pub async fn send(&mut self, command: SessionCommand) {
        self.sender.send(command).await.expect("Failed to send SessionCommand");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_entry_label_includes_name_and_signal_strength() {
        let entry = DeviceEntry {
            name: "LumiPanel-L1".to_string(),
            rssi: -60,
        };
        assert_eq!(entry.label(), "LumiPanel-L1 [-60 dBm]");
    }
}
