//! Audio subsystem module

pub mod device;
pub mod frame;
pub mod meter;
pub mod monitor;
pub mod processor;
pub mod tone;
pub mod transform;

pub use device::{CaptureSource, FillOutcome, MemorySink, NullSink, PlaybackSink, ReaderSource, WriterSink};
pub use frame::{AudioFrame, FrameSnapshot};
pub use meter::{LevelMeter, VuMeter, VuReading, VuZone};
pub use monitor::{FrameConsumer, MonitorHandle, SnapshotHistory, Tap};
pub use processor::{
    AudioProcessor, ProcessorEvent, ProcessorState, ProcessorStats, StopHandle, StopReason,
};
pub use tone::ToneSource;
pub use transform::{FrameTransform, Passthrough};
