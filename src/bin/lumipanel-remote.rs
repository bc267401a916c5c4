use std::env;
use log::info;
use msgbox::IconType;
use lumipanel_remote::{init_logging, run};
use lumipanel_remote::error::{error_msgbox, AppRunError, ConfigError};

fn main() -> Result<(), AppRunError> {
    init_logging();
    info!(concat!("LumiPanel Remote ", env!("CARGO_PKG_VERSION")));

    let args = env::args();

    match run(args) {
        Err(AppRunError::ConfigError { source: ConfigError::CanNotLock { .. } }) => {
            msgbox::create(
                concat!("LumiPanel Remote ", env!("CARGO_PKG_VERSION")),
                "This application has already been started",
                IconType::Error,
            ).expect("Could not create msgbox");
            Ok(())
        },
        Err(err) => {
            error_msgbox("Unexpected error", &err);
            Err(err)
        }
        Ok(_) => Ok(())
    }
}
