// Window shim - winit window driven by non-blocking event pumps
//
// The frame loop owns the schedule, so instead of handing control to
// `EventLoop::run_app` we pump pending events once per tick.

use anyhow::Result;
use raw_window_handle::{
    HasRawDisplayHandle, HasRawWindowHandle, RawDisplayHandle, RawWindowHandle,
};
use std::time::Duration;
use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    error::OsError,
    event::{ElementState, KeyEvent, WindowEvent},
    event_loop::{ActiveEventLoop, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    platform::pump_events::{EventLoopExtPumpEvents, PumpStatus},
    window::{Window, WindowId},
};

use crate::config::WindowConfig;
use crate::error::WindowError;
use crate::frame_loop::EventSource;

/// Pumps allowed for the platform to deliver `resumed` at startup
const STARTUP_PUMPS: u32 = 16;

/// Event handler state shared with winit during each pump
struct WindowState {
    config: WindowConfig,
    window: Option<Window>,
    create_error: Option<OsError>,
    close_requested: bool,
}

impl ApplicationHandler for WindowState {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() || self.create_error.is_some() {
            return;
        }

        let attributes = Window::default_attributes()
            .with_title(&self.config.title)
            .with_inner_size(PhysicalSize::new(self.config.width, self.config.height))
            .with_resizable(false);

        match event_loop.create_window(attributes) {
            Ok(window) => self.window = Some(window),
            Err(e) => self.create_error = Some(e),
        }
    }

    fn window_event(&mut self, _event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested");
                self.close_requested = true;
            }
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(KeyCode::Escape),
                        state: ElementState::Pressed,
                        ..
                    },
                ..
            } => {
                log::info!("ESC pressed, exiting...");
                self.close_requested = true;
            }
            _ => {}
        }
    }
}

pub struct Platform {
    // Window is dropped before the event loop in `shutdown`
    window: Window,
    state: WindowState,
    event_loop: EventLoop<()>,
}

impl Platform {
    /// Open the window and pump until the platform has created it.
    pub fn new(config: &WindowConfig) -> Result<Self> {
        let mut event_loop = EventLoop::new().map_err(WindowError::from)?;
        let mut state = WindowState {
            config: config.clone(),
            window: None,
            create_error: None,
            close_requested: false,
        };

        for _ in 0..STARTUP_PUMPS {
            let status = event_loop.pump_app_events(Some(Duration::ZERO), &mut state);
            if let Some(e) = state.create_error.take() {
                return Err(WindowError::from(e).into());
            }
            if let PumpStatus::Exit(code) = status {
                anyhow::bail!("Event loop exited with code {} before the window opened", code);
            }
            if state.window.is_some() {
                break;
            }
        }

        let window = state
            .window
            .take()
            .ok_or(WindowError::NotCreated(STARTUP_PUMPS))?;

        log::info!(
            "Opened window '{}' ({}x{})",
            config.title,
            config.width,
            config.height
        );

        Ok(Self {
            window,
            state,
            event_loop,
        })
    }

    pub fn raw_handles(&self) -> (RawDisplayHandle, RawWindowHandle) {
        (
            self.window.raw_display_handle(),
            self.window.raw_window_handle(),
        )
    }
}

impl EventSource for Platform {
    fn close_requested(&self) -> bool {
        self.state.close_requested
    }

    fn poll_events(&mut self) {
        let status = self
            .event_loop
            .pump_app_events(Some(Duration::ZERO), &mut self.state);
        if let PumpStatus::Exit(code) = status {
            log::info!("Event loop exited with code {}", code);
            self.state.close_requested = true;
        }
    }

    fn shutdown(self) {
        let Platform {
            window, event_loop, ..
        } = self;

        drop(window);
        log::info!("Window destroyed");
        drop(event_loop);
        log::info!("Windowing library terminated");
    }
}
