//! Argus: real-time RAW sensor capture and display.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use argus::capture::{CaptureSession, FrameReader, SyntheticSession, V4l2Session};
use argus::display::Sdl2Display;
use argus::pipeline::Supervisor;
use argus::{utils, Config};
use color_eyre::{eyre::eyre, Result};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter("argus=debug")
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("Argus launching...");

    // Load configuration
    let config = Config::load()?;
    argus::CONFIG.store(Arc::new(config.clone()));

    // Resolve the capture device: configured, else auto-detected, else the
    // synthetic source.
    let device = match config.capture.device.clone() {
        Some(device) => Some(device),
        None => match utils::auto_detect_device() {
            Ok(device) => Some(device),
            Err(e) => {
                warn!(error = %e, "falling back to synthetic source");
                None
            }
        },
    };

    let mut capture_config = config.capture.clone();
    if let Some(ref device) = device {
        capture_config.pattern = device.pattern;
    }

    // Frame source: the reader allocates and tracks every raw buffer, the
    // channel is the registered completion callback.
    let reader = Arc::new(FrameReader::new(
        capture_config.width,
        capture_config.height,
        capture_config.pattern,
    ));
    let (completions_tx, completions_rx) =
        flume::bounded(capture_config.buffer_count as usize);

    let session: Box<dyn CaptureSession> = match device {
        Some(device) => {
            info!(path = %device.path, "using capture device");
            Box::new(V4l2Session::open(
                &device.path,
                &capture_config,
                Arc::clone(&reader),
                completions_tx,
            )?)
        }
        None => Box::new(SyntheticSession::new(Arc::clone(&reader), completions_tx)),
    };

    // Initialize SDL2 and the window surface
    let sdl_context = sdl2::init().map_err(|e| eyre!(e))?;
    let (mut display, surface) =
        Sdl2Display::new(&sdl_context, config.display.width, config.display.height)?;

    let mut supervisor = Supervisor::new(&config);
    supervisor.start(session, completions_rx, Box::new(surface))?;

    // Ctrl-C quits the event loop the same way a window close does.
    let quit = Arc::new(AtomicBool::new(false));
    {
        let quit = Arc::clone(&quit);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                quit.store(true, Ordering::Release);
            }
        });
    }

    display.run(&sdl_context, quit)?;

    supervisor.stop().await;
    info!(outstanding = reader.outstanding(), "Argus shutting down");
    Ok(())
}
