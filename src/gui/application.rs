use iced::{Alignment, Application, Command, Element, Length, Settings, Size, Subscription, window};
use iced::event::{self, Event};
use iced::time::{every as iced_time_every};
use iced::theme::{self, Theme};
use iced::widget::{Column, button, column, container, horizontal_rule, row, text, toggler};
use std::time::Duration;
use log::{error, info};
use tokio_util::sync::CancellationToken;

use crate::config::io::ConfigIO;
use crate::config::types::Config;
use crate::device::session::session_subscription;
use crate::device::types::{ConnectionState, DeviceEntry, SessionCommand, SessionEvent, SessionHandle};
use crate::error::AppRunError;
use crate::gui::style::status_color;
use crate::gui::types::Message;

pub struct ApplicationFlags {
    config_io: ConfigIO,
}

pub struct RemoteApplication {
    // this token is cancelled upon exit
    app_cancel: CancellationToken,

    // messages that the user must click away
    notices: Vec<String>,

    // current config, might not be saved to disk yet
    config_io: ConfigIO,
    config: Config,
    config_loaded: bool,
    config_dirty: bool,
    // this flag is used to make sure that a user is not spammed with save configuration errors
    displayed_config_save_error: bool,

    // the command channel into the session, delivered by the first session event
    session: Option<SessionHandle>,

    // latest state from the session
    connection_state: ConnectionState,
    devices: Vec<DeviceEntry>,
    battery: Option<u8>,
    output_on: bool,
}

impl RemoteApplication {
    fn before_close(&mut self) {
        self.app_cancel.cancel();
    }

    fn load_config(&self) -> Command<Message> {
        let config_io = self.config_io.clone();

        let fut = async move {
            match config_io.read().await {
                Ok(config) => (config, None),
                Err(err) => {
                    let mut error_message: Option<String> = None;

                    if err.is_file_not_found_error() {
                        // this is probably the first start of the app
                        info!("Config file not found, using defaults");
                    } else {
                        error!("Failed to load config: {:?}", &err);
                        error_message = Some(format!("Failed to load config: {}", &err));
                    }
                    (Config::default(), error_message)
                }
            }
        };

        Command::perform(fut, Message::ConfigLoadComplete)
    }

    fn save_config(&self) -> Command<Message> {
        let config = self.config.clone();
        let config_io = self.config_io.clone();

        let fut = async move {
            match config_io.save(config).await {
                Ok(_) => None,
                Err(err) => {
                    error!("Failed to save config: {:?}", &err);
                    Some(format!("Failed to save config: {}", &err))
                },
            }
        };

        Command::perform(fut, Message::ConfigSaveComplete)
    }

    fn send_session_command(&self, command: SessionCommand) -> Command<Message> {
        let session = self.session.clone();

        let fut = async move {
            if let Some(mut session) = session {
                session.send(command).await;
            }
        };

        Command::perform(fut, Message::CommandSent)
    }
}

impl Application for RemoteApplication {
    type Executor = iced::executor::Default;
    type Message = Message;
    type Theme = Theme;
    type Flags = ApplicationFlags;

    fn new(flags: ApplicationFlags) -> (RemoteApplication, Command<Self::Message>) {
        let app = RemoteApplication {
            app_cancel: CancellationToken::new(),
            notices: Vec::new(),
            config_io: flags.config_io,
            config: Config::default(),
            config_loaded: false,
            config_dirty: false,
            displayed_config_save_error: false,
            session: None,
            connection_state: ConnectionState::Disconnected,
            devices: Vec::new(),
            battery: None,
            output_on: false,
        };

        let command = app.load_config();
        (app, command)
    }

    fn title(&self) -> String {
        String::from(concat!("LumiPanel Remote ", env!("CARGO_PKG_VERSION")))
    }

    fn update(&mut self, message: Message) -> Command<Self::Message> {
        match message {
            Message::ConfigLoadComplete((config, error_message)) => {
                info!("Config load complete");
                self.config = config;
                self.config_loaded = true;
                if let Some(error_message) = error_message {
                    self.notices.push(error_message);
                }
            },
            Message::ApplyDirtyConfig => {
                if self.config_dirty {
                    self.config_dirty = false;
                    return self.save_config();
                }
            },
            Message::ConfigSaveComplete(error_message) => {
                if !self.displayed_config_save_error {
                    if let Some(error_message) = error_message {
                        self.displayed_config_save_error = true;
                        self.notices.push(error_message);
                    }
                }
            },
            Message::NoticeConfirmed => {
                if !self.notices.is_empty() {
                    self.notices.remove(0);
                }
            },
            Message::EventOccurred(Event::Window(id, window::Event::CloseRequested)) => {
                info!("Close requested");
                self.before_close();
                return window::close(id);
            },
            Message::SessionEvent(SessionEvent::Ready(handle)) => {
                self.session = Some(handle);
            },
            Message::SessionEvent(SessionEvent::StateChange(state)) => {
                if let ConnectionState::Connected(name) = &state {
                    if self.config.last_device_name.as_deref() != Some(name.as_str()) {
                        self.config.last_device_name = Some(name.clone());
                        self.config_dirty = true;
                    }
                }

                // the battery readout and the output switch only apply to the
                // state that just ended
                self.battery = None;
                self.output_on = false;
                self.connection_state = state;
            },
            Message::SessionEvent(SessionEvent::DeviceListChange(devices)) => {
                self.devices = devices;
            },
            Message::SessionEvent(SessionEvent::Battery(percent)) => {
                self.battery = Some(percent);
            },
            Message::SessionEvent(SessionEvent::OutputRejected { requested }) => {
                self.output_on = !requested;
                self.notices.push(
                    "The light output can only be switched after the connected \
device's services are ready.".to_string()
                );
            },
            Message::ScanPressed => {
                return self.send_session_command(SessionCommand::StartScan);
            },
            Message::DevicePressed(name) => {
                return self.send_session_command(SessionCommand::Connect(name));
            },
            Message::OutputToggled(on) => {
                self.output_on = on;
                return self.send_session_command(SessionCommand::SetOutput(on));
            },

            _ => {}
        }

        Command::none()
    }

    fn subscription(&self) -> Subscription<Message> {
        let mut subscriptions = vec![
            event::listen().map(Message::EventOccurred),
            iced_time_every(Duration::from_secs(1)).map(|_| Message::ApplyDirtyConfig),
        ];

        // the session is started once, as soon as the config has been read
        if self.config_loaded {
            subscriptions.push(
                session_subscription(self.app_cancel.clone(), self.config.clone())
                    .map(Message::SessionEvent),
            );
        }

        Subscription::batch(subscriptions)
    }

    fn view(&self) -> Element<Message> {
        if let Some(notice) = self.notices.first() {
            return container(
                column![
                    text(notice),

                    button(text("Okay"))
                        .on_press(Message::NoticeConfirmed),

                ].align_items(Alignment::Center).spacing(20),
            )
            .width(Length::Fill)
            .padding(20)
            .into()
        }

        let status_text = match &self.connection_state {
            ConnectionState::Disconnected => "Not connected".to_string(),
            ConnectionState::Scanning => "Scanning…".to_string(),
            ConnectionState::Connecting(name) => format!("Connecting: {}", name),
            ConnectionState::Connected(name) => format!("Connected: {}", name),
            ConnectionState::ServicesReady(name) => format!("Ready: {}", name),
            ConnectionState::Failed(name) => format!("Disconnected or failed: {}", name),
        };

        let device_row = |entry: &DeviceEntry| -> Element<Message> {
            button(text(entry.label()))
                .style(theme::Button::Secondary)
                .on_press(Message::DevicePressed(entry.name.clone()))
                .into()
        };

        let mut scan_button = button(text("Scan"));
        if self.session.is_some() {
            scan_button = scan_button.on_press(Message::ScanPressed);
        }

        let battery_text = match self.battery {
            None => "".to_string(),
            Some(percent) => format!("Battery: {}%", percent),
        };

        let last_device_text = match (&self.connection_state, &self.config.last_device_name) {
            (ConnectionState::Disconnected, Some(name)) => format!("Last device: {}", name),
            _ => "".to_string(),
        };

        container(
            column![
                text(status_text).style(theme::Text::Color(status_color(&self.connection_state))),

                horizontal_rule(10),

                Column::with_children(
                    self.devices
                        .iter()
                        .map(device_row)
                        .map(Element::from)
                )
                    .spacing(10)
                    .width(Length::Shrink),

                row![
                    scan_button,

                    toggler(Some("Light output".to_string()), self.output_on, Message::OutputToggled)
                        .width(Length::Shrink),
                ].align_items(Alignment::Center).spacing(20),

                text(battery_text),
                text(last_device_text).size(14),

            ].align_items(Alignment::Center).spacing(30),
        )
        .width(Length::Fill)
        .padding(20)
        .into()
    }
}

pub fn run_application() -> Result<(), AppRunError> {
    let mut config_io = ConfigIO::new_sync()?;
    let mut config_locker = config_io.locker()?;
    let _lock_guard = config_locker.lock()?;

    let flags = ApplicationFlags { config_io };
    let mut settings = Settings::with_flags(flags);

    // handle exits ourselves (Event::CloseRequested)
    settings.id = Some("lumipanel-remote".to_string());
    settings.window.exit_on_close_request = false;
    settings.window.size = Size::new(480.0, 640.0);
    settings.window.resizable = false;

    // this function will call process::exit() unless there was a startup error
    RemoteApplication::run(settings)?;
    Ok(())
}
