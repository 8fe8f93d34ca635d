//! Recording Pipeline
//!
//! ```text
//! FrameSource ──► pump_frames ──► SensorMapper snapshot ──► WriterPool
//!  (stream)        (select w/       (map per group)          (one queue +
//!                   cancel)                                   thread / group)
//! ```
//!
//! Network I/O stays on the async runtime; persistence runs on dedicated
//! OS threads. Queues are unbounded so the streaming loop never blocks on
//! the database.

pub mod recorder;
pub mod source;
pub mod writer;

pub use recorder::{pump_frames, RecordingSession, RecordingSummary, StopReason};
pub use source::{FrameEvent, FrameSource, ReplaySource};
pub use writer::{batch_threshold, WriterPool, WriterReport, WriterSettings};
