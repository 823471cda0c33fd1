//! Frame transform stage
//!
//! The single place an effect would sit between capture and playback.
//! A transform runs on the processing thread and must finish within one
//! frame's real-time budget or playback will drop out.

use crate::audio::frame::AudioFrame;

/// Produces the output frame from the input frame
pub trait FrameTransform: Send {
    /// Both frames have the configured frame size. `input` carries the
    /// loudness metered on the previous iteration.
    fn process(&mut self, input: &AudioFrame, output: &mut AudioFrame);
}

/// Identity: copies samples and loudness unchanged
#[derive(Debug, Default, Clone, Copy)]
pub struct Passthrough;

impl FrameTransform for Passthrough {
    fn process(&mut self, input: &AudioFrame, output: &mut AudioFrame) {
        output.copy_from(input);
    }
}

impl<F> FrameTransform for F
where
    F: FnMut(&AudioFrame, &mut AudioFrame) + Send,
{
    fn process(&mut self, input: &AudioFrame, output: &mut AudioFrame) {
        self(input, output)
    }
}
