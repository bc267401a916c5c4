use iced::Event;

use crate::config::types::Config;
use crate::device::types::SessionEvent;

#[derive(Debug, Clone)]
pub enum Message {
    EventOccurred(Event),
    ApplyDirtyConfig,
    CommandSent(()),
    ConfigLoadComplete((Config, Option<String>)),
    ConfigSaveComplete(Option<String>),
    SessionEvent(SessionEvent),
    ScanPressed,
    DevicePressed(String),
    OutputToggled(bool),
    NoticeConfirmed,
}
