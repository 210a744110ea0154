//! sentineld - PPE Sentinel daemon
//!
//! This daemon:
//! 1. Loads configuration (file, env, flags)
//! 2. Serves the HTTP API (lifecycle routes, detections, annotated MJPEG)
//! 3. Optionally connects to a stream at startup
//! 4. Stops the session and the API on Ctrl-C

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::{mpsc, Arc};

use ppe_sentinel::{
    api::{ApiConfig, ApiServer},
    Annotator, DefaultOpener, FramePipeline, ModelLoader, MotorProxy, SentinelConfig,
    SessionManager,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Live PPE and hazard detection over an MJPEG feed")]
struct Args {
    /// Address the HTTP API binds to.
    #[arg(long)]
    api_addr: Option<String>,

    /// Stream to open at startup (implies --autoconnect).
    #[arg(long)]
    stream_url: Option<String>,

    /// Motor controller address (host or host:port).
    #[arg(long)]
    controller: Option<String>,

    /// ONNX model file. Requires the backend-tract feature.
    #[arg(long)]
    model: Option<PathBuf>,

    /// TrueType font overriding the bundled label font.
    #[arg(long)]
    font: Option<PathBuf>,

    /// Connect to the configured stream at startup.
    #[arg(long)]
    autoconnect: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut config = SentinelConfig::load()?;
    if let Some(addr) = args.api_addr {
        config.api_addr = addr;
    }
    if let Some(url) = args.stream_url {
        config.stream_url = Some(url);
        config.autoconnect = true;
    }
    if let Some(controller) = args.controller {
        config.controller = Some(controller);
    }
    if let Some(model) = args.model {
        config.model.path = Some(model);
    }
    if let Some(font) = args.font {
        config.font_path = Some(font);
    }
    config.autoconnect |= args.autoconnect;
    config.validate()?;

    let annotator = Annotator::from_optional_font(config.font_path.as_deref());
    let pipeline = FramePipeline::new(config.engine.clone(), annotator);
    let loader = ModelLoader::from_settings(&config.model)?;
    let opener = Arc::new(DefaultOpener::new(config.mjpeg.clone()));
    let session = Arc::new(SessionManager::new(
        opener,
        loader,
        pipeline,
        config.capture.clone(),
    ));

    let api_config = ApiConfig {
        addr: config.api_addr.clone(),
        stream: config.stream.clone(),
    };
    let motor = MotorProxy::new(config.motor.clone());
    let api_handle = ApiServer::new(api_config, session.clone(), motor).spawn()?;
    log::info!("sentinel api listening on {}", api_handle.addr);

    if config.autoconnect {
        if let Some(url) = config.stream_url.as_deref() {
            let controller = config.controller.as_deref().unwrap_or("");
            if let Err(err) = session.connect(url, controller) {
                log::warn!("autoconnect to {} failed: {}", url, err);
            }
        }
    }

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .expect("error setting Ctrl-C handler");

    log::info!("sentineld waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping...");
    api_handle.stop()?;
    session.disconnect();

    Ok(())
}
