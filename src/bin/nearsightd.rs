//! nearsightd - detection session daemon
//!
//! This daemon:
//! 1. Loads configuration (NEARSIGHT_CONFIG file plus NEARSIGHT_* overrides)
//! 2. Builds the session controller (camera source, detector, voice)
//! 3. Serves the HTTP control surface and MJPEG stream
//! 4. Stops the running session and the server on Ctrl-C

use anyhow::Result;
use std::sync::mpsc;

use nearsight::{
    api::{ApiConfig, ApiServer},
    NearsightConfig, SessionController,
};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = NearsightConfig::load()?;
    log::info!(
        "camera backend {} (device {}), detector backend {}",
        config.camera.backend,
        config.camera.device_index,
        config.detector.backend
    );
    match &config.voice.command {
        Some(command) => log::info!("voice command: {}", command),
        None => log::info!("voice alerts are logged only"),
    }

    let controller = SessionController::from_config(&config)?;
    let api_config = ApiConfig {
        addr: config.api_addr.clone(),
    };
    let api_handle = ApiServer::new(api_config, controller.clone()).spawn()?;
    log::info!("control api listening on {}", api_handle.addr);

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .expect("error setting Ctrl-C handler");

    log::info!("nearsightd waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping session and API server...");
    controller.stop();
    api_handle.stop()?;

    Ok(())
}
