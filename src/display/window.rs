//! SDL2 window glue.
//!
//! `WindowSurface` is the `DrawSurface` half handed to the pipeline: it
//! builds CPU draw targets sized to the current window and ships presented
//! targets over a depth-one channel. `Sdl2Display` runs on the main thread,
//! pumping events and blitting whatever arrives.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use color_eyre::{eyre::eyre, Result};
use sdl2::event::{Event, WindowEvent};
use sdl2::pixels::PixelFormatEnum;
use sdl2::render::{Canvas, TextureCreator};
use sdl2::video::{Window, WindowContext};
use tracing::info;

use crate::display::surface::{DrawSurface, DrawTarget};

/// Poll cadence of the event loop while no frame arrives.
const IDLE_POLL: Duration = Duration::from_millis(33);

struct SurfaceSize {
    width: AtomicU32,
    height: AtomicU32,
}

/// Pipeline-side surface backed by the SDL2 window.
pub struct WindowSurface {
    targets: flume::Sender<DrawTarget>,
    size: Arc<SurfaceSize>,
}

impl DrawSurface for WindowSurface {
    fn is_valid(&self) -> bool {
        !self.targets.is_disconnected()
    }

    fn acquire_target(&mut self) -> Option<DrawTarget> {
        let width = self.size.width.load(Ordering::Acquire);
        let height = self.size.height.load(Ordering::Acquire);
        if width == 0 || height == 0 {
            return None;
        }
        Some(DrawTarget::new(width, height))
    }

    fn present(&mut self, target: DrawTarget) {
        // Depth-one channel: if the window is still busy with the previous
        // target this frame is dropped, display is best-effort.
        let _ = self.targets.try_send(target);
    }
}

/// SDL2 window, event loop, and target presentation.
pub struct Sdl2Display {
    canvas: Canvas<Window>,
    texture_creator: TextureCreator<WindowContext>,
    targets: flume::Receiver<DrawTarget>,
    size: Arc<SurfaceSize>,
}

impl Sdl2Display {
    pub fn new(
        sdl_context: &sdl2::Sdl,
        width: u32,
        height: u32,
    ) -> Result<(Self, WindowSurface)> {
        let video_subsystem = sdl_context.video().map_err(|e| eyre!(e))?;

        let window = video_subsystem
            .window("Argus Raw Viewer", width, height)
            .position_centered()
            .resizable()
            .build()?;

        let canvas = window.into_canvas().present_vsync().build()?;
        let texture_creator = canvas.texture_creator();

        let (out_w, out_h) = canvas.output_size().map_err(|e| eyre!(e))?;
        let size = Arc::new(SurfaceSize {
            width: AtomicU32::new(out_w),
            height: AtomicU32::new(out_h),
        });

        let (tx, rx) = flume::bounded(1);
        let surface = WindowSurface {
            targets: tx,
            size: Arc::clone(&size),
        };

        Ok((
            Self {
                canvas,
                texture_creator,
                targets: rx,
                size,
            },
            surface,
        ))
    }

    fn blit(&mut self, target: &DrawTarget) -> Result<()> {
        let mut texture = self
            .texture_creator
            .create_texture_streaming(PixelFormatEnum::RGB24, target.width, target.height)
            .map_err(|e| eyre!(e))?;

        texture
            .update(None, &target.pixels, target.width as usize * 3)
            .map_err(|e| eyre!(e))?;

        self.canvas.clear();
        self.canvas
            .copy(&texture, None, None)
            .map_err(|e| eyre!(e))?;
        self.canvas.present();
        Ok(())
    }

    /// Run the event loop until the window closes or `quit` is raised.
    pub fn run(&mut self, sdl_context: &sdl2::Sdl, quit: Arc<AtomicBool>) -> Result<()> {
        let mut event_pump = sdl_context.event_pump().map_err(|e| eyre!(e))?;

        'running: loop {
            if quit.load(Ordering::Acquire) {
                info!("quit signal received");
                break;
            }
            for event in event_pump.poll_iter() {
                match event {
                    Event::Quit { .. } => {
                        info!("window close requested");
                        break 'running;
                    }
                    Event::Window {
                        win_event: WindowEvent::SizeChanged(w, h),
                        ..
                    } => {
                        self.size.width.store(w.max(0) as u32, Ordering::Release);
                        self.size.height.store(h.max(0) as u32, Ordering::Release);
                    }
                    _ => {}
                }
            }

            match self.targets.recv_timeout(IDLE_POLL) {
                Ok(target) => self.blit(&target)?,
                Err(flume::RecvTimeoutError::Timeout) => {}
                Err(flume::RecvTimeoutError::Disconnected) => break,
            }
        }

        Ok(())
    }
}
