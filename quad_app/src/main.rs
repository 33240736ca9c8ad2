//! Textured quad demo
//!
//! Loads `quad_app.toml` from the working directory when present and renders
//! the spinning two-quad scene until the window is closed.

use std::path::Path;
use std::process::ExitCode;

use frame_pipeline::foundation::logging;
use frame_pipeline::{AppConfig, Application, Config};

const CONFIG_PATH: &str = "quad_app.toml";

fn load_config() -> Result<AppConfig, frame_pipeline::ConfigError> {
    if Path::new(CONFIG_PATH).exists() {
        log::info!("Loading configuration from {}", CONFIG_PATH);
        AppConfig::load_from_file(CONFIG_PATH)
    } else {
        log::debug!("{} not found, using defaults", CONFIG_PATH);
        Ok(AppConfig::default())
    }
}

fn run() -> Result<(), frame_pipeline::AppError> {
    let config = load_config()?;
    let mut app = Application::new(&config)?;
    app.run()
}

fn main() -> ExitCode {
    logging::init(log::LevelFilter::Info);

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
