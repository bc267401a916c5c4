use iced::Color;

use crate::device::types::ConnectionState;

pub fn status_color(state: &ConnectionState) -> Color {
    match state {
        ConnectionState::Disconnected => Color::from_rgb(0.45, 0.45, 0.45),
        ConnectionState::Scanning => Color::from_rgb(0.72, 0.58, 0.05),
        ConnectionState::Connecting(_) => Color::from_rgb(0.85, 0.45, 0.0),
        ConnectionState::Connected(_) => Color::from_rgb(0.1, 0.55, 0.25),
        ConnectionState::ServicesReady(_) => Color::from_rgb(0.0, 0.45, 0.15),
        ConnectionState::Failed(_) => Color::from_rgb(0.8, 0.1, 0.1),
    }
}
