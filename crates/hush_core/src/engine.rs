//! Audio Engine - Main Entry Point
//!
//! The AudioEngine owns an [`AudioPipeline`] and a control thread that
//! manages the device streams feeding it.
//!
//! # Architecture
//!
//! ```text
//!   caller ──Command──▶ hush-control thread ──owns──▶ DeviceStreams (cpal)
//!     │                                                    │
//!     │  switch_backend / set_parameter (synchronous)      ▼
//!     └──────────────────────────────────────────────▶ AudioPipeline
//!                                                          │
//!   caller ◀──────────────── Event channel ◀───────────────┘
//! ```
//!
//! cpal streams are not `Send` on every platform, so they are created and
//! dropped on the control thread only.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use hush_dsp::{BackendKind, ParamValue};
use tracing::{error, info, warn};

use crate::config::EngineConfig;
use crate::device::{resolve_device, AudioDevice, DeviceType};
use crate::error::{EngineError, EngineResult};
use crate::message::{Command, Event};
use crate::pipeline::{AudioPipeline, PipelineStats, EVENT_CHANNEL_CAPACITY};
use crate::stream::DeviceStreams;

/// How often the control thread re-checks the shutdown flag
const CONTROL_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// The main audio engine controller
pub struct AudioEngine {
    command_sender: Sender<Command>,
    event_receiver: Receiver<Event>,
    control_thread: Option<JoinHandle<()>>,
    shutdown_flag: Arc<AtomicBool>,
    is_running: Arc<AtomicBool>,
    pipeline: Arc<AudioPipeline>,
    config: EngineConfig,
}

impl AudioEngine {
    /// Create an engine with the default speech configuration
    pub fn new() -> EngineResult<Self> {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> EngineResult<Self> {
        let (command_sender, command_receiver) = bounded::<Command>(32);
        let (event_sender, event_receiver) = bounded::<Event>(EVENT_CHANNEL_CAPACITY);

        let pipeline = Arc::new(AudioPipeline::new(config.pipeline.clone(), event_sender.clone())?);
        let shutdown_flag = Arc::new(AtomicBool::new(false));
        let is_running = Arc::new(AtomicBool::new(false));

        let control = ControlThread {
            commands: command_receiver,
            events: event_sender,
            shutdown_flag: Arc::clone(&shutdown_flag),
            is_running: Arc::clone(&is_running),
            pipeline: Arc::clone(&pipeline),
            config: config.clone(),
            streams: None,
        };

        let control_thread = thread::Builder::new()
            .name("hush-control".into())
            .spawn(move || control.run())
            .map_err(|e| EngineError::ThreadSpawn(e.to_string()))?;

        Ok(Self {
            command_sender,
            event_receiver,
            control_thread: Some(control_thread),
            shutdown_flag,
            is_running,
            pipeline,
            config,
        })
    }

    /// Open the pipeline and start the device streams
    pub fn start(&self) -> EngineResult<()> {
        self.send_command(Command::Start)
    }

    /// Stop the device streams and close the pipeline
    pub fn stop(&self) -> EngineResult<()> {
        self.send_command(Command::Stop)
    }

    /// Ask for an `Event::StateUpdate`
    pub fn request_state(&self) -> EngineResult<()> {
        self.send_command(Command::RequestState)
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// Swap the processing backend; takes effect on the next frame
    pub fn switch_backend(&self, kind: BackendKind) -> EngineResult<()> {
        self.pipeline.switch_backend(kind)
    }

    /// Set a parameter on the active backend
    pub fn set_parameter(&self, name: &str, value: impl Into<ParamValue>) -> EngineResult<()> {
        self.pipeline.set_effect_parameter(name, value.into())
    }

    pub fn current_backend(&self) -> Option<BackendKind> {
        self.pipeline.current_backend()
    }

    pub fn stats(&self) -> PipelineStats {
        self.pipeline.stats()
    }

    /// Get next event (non-blocking)
    pub fn poll_event(&self) -> Option<Event> {
        self.event_receiver.try_recv().ok()
    }

    /// Get next event (blocking)
    pub fn wait_event(&self) -> Option<Event> {
        self.event_receiver.recv().ok()
    }

    pub fn wait_event_timeout(&self, timeout: Duration) -> Option<Event> {
        self.event_receiver.recv_timeout(timeout).ok()
    }

    pub fn list_devices(&self) -> EngineResult<Vec<AudioDevice>> {
        AudioDevice::enumerate_all()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Shared handle to the pipeline, for feeding it without devices
    pub fn pipeline(&self) -> &Arc<AudioPipeline> {
        &self.pipeline
    }

    fn send_command(&self, command: Command) -> EngineResult<()> {
        self.command_sender
            .send(command)
            .map_err(|_| EngineError::ChannelSendError)
    }
}

impl Drop for AudioEngine {
    fn drop(&mut self) {
        self.shutdown_flag.store(true, Ordering::SeqCst);
        let _ = self.command_sender.send(Command::Shutdown);

        if let Some(handle) = self.control_thread.take() {
            let _ = handle.join();
        }
    }
}

/// State owned by the control thread
struct ControlThread {
    commands: Receiver<Command>,
    events: Sender<Event>,
    shutdown_flag: Arc<AtomicBool>,
    is_running: Arc<AtomicBool>,
    pipeline: Arc<AudioPipeline>,
    config: EngineConfig,
    streams: Option<DeviceStreams>,
}

impl ControlThread {
    fn run(mut self) {
        info!("Control thread started");

        while !self.shutdown_flag.load(Ordering::SeqCst) {
            match self.commands.recv_timeout(CONTROL_POLL_INTERVAL) {
                Ok(Command::Start) => self.handle_start(),
                Ok(Command::Stop) => self.handle_stop(),
                Ok(Command::RequestState) => self.emit(self.state()),
                Ok(Command::Shutdown) => break,
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        if self.streams.take().is_some() {
            if let Err(e) = self.pipeline.close() {
                warn!("Failed to close pipeline: {}", e);
            }
        }
        self.is_running.store(false, Ordering::SeqCst);
        info!("Control thread shutting down");
    }

    fn emit(&self, event: Event) {
        let _ = self.events.try_send(event);
    }

    fn handle_start(&mut self) {
        if self.streams.is_some() {
            warn!("Engine already running");
            self.emit(Event::error(EngineError::AlreadyRunning));
            return;
        }

        info!("Starting audio engine");
        match self.open_streams() {
            Ok(streams) => {
                self.streams = Some(streams);
                self.is_running.store(true, Ordering::SeqCst);
                self.emit(Event::Started);
            }
            Err(e) => {
                error!("Failed to start engine: {}", e);
                if let Err(close_err) = self.pipeline.close() {
                    warn!("Failed to close pipeline: {}", close_err);
                }
                self.emit(Event::error(e));
            }
        }
    }

    fn open_streams(&self) -> EngineResult<DeviceStreams> {
        let capture = resolve_device(DeviceType::Input, self.config.input_device.as_deref())?;
        let monitor = self
            .config
            .monitor_device
            .as_deref()
            .map(|name| resolve_device(DeviceType::Input, Some(name)))
            .transpose()?;
        let playback = resolve_device(DeviceType::Output, self.config.output_device.as_deref())?;

        self.pipeline.open()?;
        DeviceStreams::start(
            Arc::clone(&self.pipeline),
            &capture,
            monitor.as_ref(),
            &playback,
            self.events.clone(),
        )
    }

    fn handle_stop(&mut self) {
        let Some(streams) = self.streams.take() else {
            self.emit(Event::error(EngineError::NotRunning));
            return;
        };

        info!("Stopping audio engine");
        drop(streams);
        if let Err(e) = self.pipeline.close() {
            warn!("Failed to close pipeline: {}", e);
        }
        self.is_running.store(false, Ordering::SeqCst);
        self.emit(Event::Stopped);
    }

    fn state(&self) -> Event {
        let stats = self.pipeline.stats();
        Event::StateUpdate {
            is_running: self.streams.is_some(),
            is_open: self.pipeline.is_open(),
            backend: self.pipeline.current_backend(),
            frame_ms: self.pipeline.frame_duration_ms(),
            frames_processed: stats.frames_processed,
            frames_dropped: stats.frames_dropped,
        }
    }
}
