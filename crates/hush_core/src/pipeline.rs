//! Audio Pipeline
//!
//! Frame-quantized processing between free-running capture feeds and a
//! playback consumer.
//!
//! # Architecture
//!
//! ```text
//!   write() ──▶ input queue ──┐
//!                             ├──▶ hush-processing thread ──▶ output queue ──▶ read()
//!   write_aux() ─▶ aux queue ─┘         │        │
//!                                   backend   archive sinks
//! ```
//!
//! Each queue has its own lock, so feeds and the consumer never wait on
//! processing. The processing lock guards the active backend and its frame
//! duration; it is taken first whenever more than one lock is needed
//! (processing → input | aux | output | sinks). The loop sleeps on the input
//! condition variable with only the input lock held.

use std::collections::VecDeque;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use hush_dsp::{create_backend, AudioBuffer, AudioEffect, AudioFormat, BackendKind, ParamValue};
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::config::PipelineConfig;
use crate::error::{EngineError, EngineResult};
use crate::message::Event;
use crate::queue::ByteQueue;
use crate::wav::WavFileWriter;

/// Capacity of the event channel created by [`AudioPipeline::with_events`]
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// How often an idle processing thread retries held-back state events
const PENDING_RETRY: Duration = Duration::from_millis(10);

/// Counters and queue depths, for diagnostics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineStats {
    pub frames_processed: u64,
    pub frames_dropped: u64,
    pub input_buffered: usize,
    pub aux_buffered: usize,
    pub output_buffered: usize,
}

struct InputState {
    queue: ByteQueue,
    /// Bumped whenever the queue is reset, so a waiting loop re-reads its frame size
    generation: u64,
    shutdown: bool,
}

struct Processing {
    backend: Box<dyn AudioEffect>,
    kind: Option<BackendKind>,
    frame_ms: u32,
}

#[derive(Default)]
struct ArchiveSinks {
    source: Option<WavFileWriter>,
    processed: Option<WavFileWriter>,
}

impl ArchiveSinks {
    fn close(&mut self) {
        for mut sink in [self.source.take(), self.processed.take()].into_iter().flatten() {
            if let Err(e) = sink.close() {
                warn!("Failed to finalize archive {:?}: {}", sink.path(), e);
            }
        }
    }
}

struct Shared {
    config: PipelineConfig,
    input: Mutex<InputState>,
    input_ready: Condvar,
    aux: Mutex<ByteQueue>,
    output: Mutex<ByteQueue>,
    sinks: Mutex<ArchiveSinks>,
    processing: Mutex<Processing>,
    open: AtomicBool,
    frames_processed: AtomicU64,
    frames_dropped: AtomicU64,
    level_format_warned: AtomicBool,
    events: Arc<EventSink>,
}

/// Event delivery that never blocks the processing thread
///
/// Per-frame notifications are dropped when the channel is full; the next
/// frame supersedes them. State changes the channel rejects are held in
/// `pending` and go out, in order, before anything else.
struct EventSink {
    sender: Sender<Event>,
    pending: Mutex<VecDeque<Event>>,
}

impl EventSink {
    fn new(sender: Sender<Event>) -> Self {
        Self {
            sender,
            pending: Mutex::new(VecDeque::new()),
        }
    }

    /// Deliver a state change, holding it back while the channel is full
    fn send(&self, event: Event) {
        let mut pending = self.pending.lock();
        if let Event::VoiceActivityChanged { active } = event {
            if let Some(Event::VoiceActivityChanged { active: last }) = pending.back() {
                // An undelivered transition followed by its reverse leaves
                // the receiver's view unchanged
                if *last != active {
                    pending.pop_back();
                }
                return;
            }
        }
        pending.push_back(event);
        Self::flush_locked(&self.sender, &mut pending);
    }

    /// Deliver a per-frame notification if nothing is held back and there is room
    fn send_lossy(&self, event: Event) {
        let mut pending = self.pending.lock();
        if Self::flush_locked(&self.sender, &mut pending) {
            let _ = self.sender.try_send(event);
        }
    }

    /// Retry held-back events; true once none remain
    fn flush(&self) -> bool {
        Self::flush_locked(&self.sender, &mut self.pending.lock())
    }

    fn flush_locked(sender: &Sender<Event>, pending: &mut VecDeque<Event>) -> bool {
        while let Some(event) = pending.pop_front() {
            match sender.try_send(event) {
                Ok(()) => {}
                Err(TrySendError::Full(event)) => {
                    pending.push_front(event);
                    return false;
                }
                Err(TrySendError::Disconnected(_)) => {
                    pending.clear();
                    return true;
                }
            }
        }
        true
    }
}

impl Shared {
    fn emit(&self, event: Event) {
        self.events.send(event);
    }

    fn emit_lossy(&self, event: Event) {
        self.events.send_lossy(event);
    }

    /// Empty all three queues and wake the loop so it re-reads the frame size
    ///
    /// Caller must hold the processing lock.
    fn clear_queues(&self) {
        {
            let mut input = self.input.lock();
            input.queue.clear();
            input.generation = input.generation.wrapping_add(1);
        }
        self.input_ready.notify_all();
        self.aux.lock().clear();
        self.output.lock().clear();
    }
}

/// Real-time voice processing pipeline
///
/// Owns the active backend and a dedicated processing thread. All methods
/// take `&self`; share it across capture and playback callbacks with `Arc`.
pub struct AudioPipeline {
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}

impl AudioPipeline {
    /// Validate `config`, build its backend and start the processing thread
    ///
    /// Events are delivered on `events` without blocking. When a bounded
    /// channel fills up, level and `OutputReady` events are lost while state
    /// changes wait for room and keep their order.
    pub fn new(config: PipelineConfig, events: Sender<Event>) -> EngineResult<Self> {
        config.validate().map_err(EngineError::ConfigError)?;

        let mut backend = create_backend(config.backend, &config.main_format, &config.aux_format)?;
        let events = Arc::new(EventSink::new(events));
        connect_voice_activity(backend.as_mut(), &events);
        let frame_ms = backend.required_interval_ms();

        info!(
            "Pipeline created: {} backend, {} ms frames, {} Hz",
            config.backend, frame_ms, config.main_format.sample_rate
        );

        let shared = Arc::new(Shared {
            input: Mutex::new(InputState {
                queue: ByteQueue::new(),
                generation: 0,
                shutdown: false,
            }),
            input_ready: Condvar::new(),
            aux: Mutex::new(ByteQueue::new()),
            output: Mutex::new(ByteQueue::new()),
            sinks: Mutex::new(ArchiveSinks::default()),
            processing: Mutex::new(Processing {
                backend,
                kind: Some(config.backend),
                frame_ms,
            }),
            open: AtomicBool::new(false),
            frames_processed: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
            level_format_warned: AtomicBool::new(false),
            events,
            config,
        });

        let loop_shared = Arc::clone(&shared);
        let thread = thread::Builder::new()
            .name("hush-processing".into())
            .spawn(move || processing_loop(loop_shared))
            .map_err(|e| EngineError::ThreadSpawn(e.to_string()))?;

        Ok(Self {
            shared,
            thread: Some(thread),
        })
    }

    /// Create a pipeline together with a bounded event channel
    pub fn with_events(config: PipelineConfig) -> EngineResult<(Self, Receiver<Event>)> {
        let (sender, receiver) = bounded(EVENT_CHANNEL_CAPACITY);
        Ok((Self::new(config, sender)?, receiver))
    }

    /// Clear all queues, open the archive files if enabled and accept input
    ///
    /// Reopening an open pipeline truncates the archives and starts over.
    pub fn open(&self) -> EngineResult<()> {
        let _processing = self.shared.processing.lock();
        self.shared.clear_queues();

        let archive = &self.shared.config.archive;
        if archive.enabled {
            let mut sinks = self.shared.sinks.lock();
            sinks.close();

            if let Err(e) = fs::create_dir_all(&archive.directory) {
                warn!("Cannot create archive directory {:?}: {}", archive.directory, e);
            }
            let format = self.shared.config.main_format;
            sinks.source = open_sink(&archive.source_path(), format);
            sinks.processed = open_sink(&archive.processed_path(), format);
        }

        self.shared.open.store(true, Ordering::SeqCst);
        info!("Pipeline opened");
        self.shared.emit(Event::Opened);
        Ok(())
    }

    /// Finalize the archive files and stop accepting input
    ///
    /// Idempotent. The processing thread keeps running.
    pub fn close(&self) -> EngineResult<()> {
        let _processing = self.shared.processing.lock();
        self.shared.sinks.lock().close();

        if self.shared.open.swap(false, Ordering::SeqCst) {
            info!("Pipeline closed");
            self.shared.emit(Event::Closed);
        }
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::SeqCst)
    }

    /// Queue main-stream bytes for processing
    ///
    /// Never waits for processing.
    pub fn write(&self, data: &[u8]) -> EngineResult<usize> {
        if !self.is_open() {
            return Err(EngineError::NotOpen);
        }
        self.shared.input.lock().queue.push(data);
        self.shared.input_ready.notify_one();
        Ok(data.len())
    }

    /// Queue echo-reference bytes
    pub fn write_aux(&self, data: &[u8]) -> EngineResult<usize> {
        if !self.is_open() {
            return Err(EngineError::NotOpen);
        }
        self.shared.aux.lock().push(data);
        Ok(data.len())
    }

    /// Move up to `buf.len()` processed bytes into `buf`
    ///
    /// Returns the number of bytes copied, possibly zero. Never blocks.
    pub fn read(&self, buf: &mut [u8]) -> usize {
        self.shared.output.lock().pop_into(buf)
    }

    /// Take up to `max` processed bytes
    pub fn read_bytes(&self, max: usize) -> Vec<u8> {
        let mut output = self.shared.output.lock();
        let mut buf = vec![0u8; max.min(output.len())];
        output.pop_into(&mut buf);
        buf
    }

    /// Processed bytes waiting to be read
    pub fn bytes_available(&self) -> usize {
        self.shared.output.lock().len()
    }

    /// Replace the active backend with a freshly built `kind`
    ///
    /// Buffered input, aux and output are discarded and the new frame
    /// duration applies to the very next frame. If the new engine cannot be
    /// built, nothing changes.
    pub fn switch_backend(&self, kind: BackendKind) -> EngineResult<()> {
        let mut processing = self.shared.processing.lock();
        let config = &self.shared.config;
        let backend = create_backend(kind, &config.main_format, &config.aux_format)?;
        self.install_locked(&mut processing, backend, Some(kind));
        Ok(())
    }

    /// Install a caller-built engine, with the same effects as a switch
    pub fn install_effect(&self, effect: Box<dyn AudioEffect>) -> EngineResult<()> {
        let mut processing = self.shared.processing.lock();
        self.install_locked(&mut processing, effect, None);
        Ok(())
    }

    fn install_locked(
        &self,
        processing: &mut Processing,
        mut backend: Box<dyn AudioEffect>,
        kind: Option<BackendKind>,
    ) {
        connect_voice_activity(backend.as_mut(), &self.shared.events);
        let was_active = processing.backend.is_voice_active();
        let frame_ms = backend.required_interval_ms();

        self.shared.clear_queues();
        let old = std::mem::replace(&mut processing.backend, backend);
        processing.kind = kind;
        processing.frame_ms = frame_ms;

        info!("Switched backend {} -> {} ({} ms frames)", old.name(), processing.backend.name(), frame_ms);
        drop(old);

        self.shared.emit(Event::BackendSwitched {
            backend: kind,
            frame_ms,
        });
        if was_active {
            self.shared.emit(Event::VoiceActivityChanged { active: false });
        }
    }

    /// Forward a named parameter to the active backend
    pub fn set_effect_parameter(&self, name: &str, value: ParamValue) -> EngineResult<()> {
        let mut processing = self.shared.processing.lock();
        processing.backend.set_parameter(name, value)?;
        debug!("Parameter {} = {:?} on {}", name, value, processing.backend.name());
        Ok(())
    }

    /// Kind of the active backend, `None` for caller-installed effects
    pub fn current_backend(&self) -> Option<BackendKind> {
        self.shared.processing.lock().kind
    }

    /// Duration of the frames the active backend consumes
    pub fn frame_duration_ms(&self) -> u32 {
        self.shared.processing.lock().frame_ms
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.shared.config
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            frames_processed: self.shared.frames_processed.load(Ordering::Relaxed),
            frames_dropped: self.shared.frames_dropped.load(Ordering::Relaxed),
            input_buffered: self.shared.input.lock().queue.len(),
            aux_buffered: self.shared.aux.lock().len(),
            output_buffered: self.shared.output.lock().len(),
        }
    }
}

impl Drop for AudioPipeline {
    fn drop(&mut self) {
        {
            let mut input = self.shared.input.lock();
            input.shutdown = true;
        }
        self.shared.input_ready.notify_all();

        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
        self.shared.sinks.lock().close();
        debug!("Pipeline shut down");
    }
}

impl io::Write for &AudioPipeline {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        AudioPipeline::write(*self, buf).map_err(|e| io::Error::new(io::ErrorKind::NotConnected, e))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl io::Read for &AudioPipeline {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(AudioPipeline::read(*self, buf))
    }
}

fn connect_voice_activity(backend: &mut dyn AudioEffect, events: &Arc<EventSink>) {
    let events = Arc::clone(events);
    backend.set_voice_activity_listener(Box::new(move |active| {
        events.send(Event::VoiceActivityChanged { active });
    }));
}

fn open_sink(path: &Path, format: AudioFormat) -> Option<WavFileWriter> {
    match WavFileWriter::create(path, format) {
        Ok(writer) => Some(writer),
        Err(e) => {
            warn!("Archive {:?} disabled: {}", path, e);
            None
        }
    }
}

/// Processing thread main loop
fn processing_loop(shared: Arc<Shared>) {
    info!("Processing thread started");
    let config = &shared.config;

    loop {
        let mut processing = shared.processing.lock();
        let frame_ms = processing.frame_ms;
        let main_bytes = config.main_bytes(frame_ms);
        let aux_bytes = config.aux_bytes(frame_ms);

        let frame = {
            let mut input = shared.input.lock();
            if input.shutdown {
                break;
            }
            match input.queue.pop_exact(main_bytes) {
                Some(frame) => frame,
                None => {
                    drop(processing);
                    let generation = input.generation;
                    while !input.shutdown
                        && input.generation == generation
                        && input.queue.len() < main_bytes
                    {
                        if shared.events.flush() {
                            shared.input_ready.wait(&mut input);
                        } else {
                            shared.input_ready.wait_for(&mut input, PENDING_RETRY);
                        }
                    }
                    continue;
                }
            }
        };

        let aux = shared
            .aux
            .lock()
            .pop_exact(aux_bytes)
            .unwrap_or_else(|| vec![0; aux_bytes]);

        if let Some(sink) = shared.sinks.lock().source.as_mut() {
            if let Err(e) = sink.append(&frame) {
                warn!("Source archive write failed: {}", e);
            }
        }

        let mut main = AudioBuffer::new(frame, config.main_format);
        let aux = AudioBuffer::new(aux, config.aux_format);
        let input_levels = main.levels();

        let started = Instant::now();
        let result = processing.backend.process(&mut main, &aux);
        trace!("{} processed {} ms frame in {:?}", processing.backend.name(), frame_ms, started.elapsed());

        if let Err(e) = result {
            shared.frames_dropped.fetch_add(1, Ordering::Relaxed);
            warn!("Dropping frame: {}", e);
            shared.emit_lossy(Event::FrameDropped {
                reason: e.to_string(),
            });
            continue;
        }

        if let Some(sink) = shared.sinks.lock().processed.as_mut() {
            if let Err(e) = sink.append(main.data()) {
                warn!("Processed archive write failed: {}", e);
            }
        }

        let output_levels = main.levels();
        if input_levels.is_empty() && !shared.level_format_warned.swap(true, Ordering::Relaxed) {
            warn!("Level metering unavailable for {:?}", config.main_format);
        }
        shared.emit_lossy(Event::InputLevelsChanged {
            levels: input_levels,
        });
        shared.emit_lossy(Event::OutputLevelsChanged {
            levels: output_levels,
        });

        let bytes_available = {
            let mut output = shared.output.lock();
            output.push(main.data());
            output.len()
        };
        shared.frames_processed.fetch_add(1, Ordering::Relaxed);
        shared.emit_lossy(Event::OutputReady { bytes_available });
    }

    info!("Processing thread stopped");
}
