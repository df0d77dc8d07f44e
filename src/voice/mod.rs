//! Voice output
//!
//! Streams the assistant's answer through a speech-synthesis session and
//! plays the resulting PCM frames in order. Audio capture is not handled
//! here; input arrives as text.

mod device;
mod frame;
mod playback;
mod tts;

pub use device::{NullDevice, OutputDevice, OutputTarget, SpeakerDevice, WavRecorder};
pub use frame::{AudioFrame, SAMPLE_RATE};
pub use playback::{DeviceFactory, PlaybackSink};
pub use tts::{
    AudioStream, FrameDecoder, Inbound, SpeechStreamer, SpeechSynthesizer, VoiceSettings,
    end_of_input_message, init_message, stream_endpoint, text_message,
};
