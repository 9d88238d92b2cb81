//! Message Types for Thread Communication
//!
//! Commands flow from the caller -> engine control thread
//! Events flow from the pipeline and engine -> caller

use hush_dsp::BackendKind;
use serde::{Deserialize, Serialize};

/// Commands sent to the engine control thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Open the pipeline and start the device streams
    Start,

    /// Stop the device streams and close the pipeline
    Stop,

    /// Request current state (triggers StateUpdate event)
    RequestState,

    /// Shutdown the control thread
    Shutdown,
}

/// Events sent from the pipeline and engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum Event {
    /// Pipeline opened (queues cleared, archive files created)
    Opened,

    /// Pipeline closed (archive headers finalized)
    Closed,

    /// Device streams running
    Started,

    /// Device streams stopped
    Stopped,

    /// Voice activity of the active backend flipped
    VoiceActivityChanged { active: bool },

    /// Per-channel dBFS peaks of the frame before processing
    InputLevelsChanged { levels: Vec<f32> },

    /// Per-channel dBFS peaks of the frame after processing
    OutputLevelsChanged { levels: Vec<f32> },

    /// A processed frame was appended to the output queue
    OutputReady { bytes_available: usize },

    /// A different engine was installed
    BackendSwitched {
        backend: Option<BackendKind>,
        frame_ms: u32,
    },

    /// A frame was discarded because the backend rejected it
    FrameDropped { reason: String },

    /// Playback drained the output queue faster than it was filled
    BufferUnderrun,

    /// Current state snapshot
    StateUpdate {
        is_running: bool,
        is_open: bool,
        backend: Option<BackendKind>,
        frame_ms: u32,
        frames_processed: u64,
        frames_dropped: u64,
    },

    /// Error occurred
    Error { message: String },
}

impl Event {
    /// Create an error event from any error type
    pub fn error<E: std::fmt::Display>(err: E) -> Self {
        Event::Error {
            message: err.to_string(),
        }
    }
}
