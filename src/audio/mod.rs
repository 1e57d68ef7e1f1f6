//! Audio synthesis: speech requests per segment and WAV assembly.

pub mod speech;
pub mod synthesizer;
pub mod wav;

pub use speech::{MockSpeechSynthesizer, OpenAiSpeech, SpeechRequest, SpeechSynthesizer};
pub use synthesizer::{AudioSynthesizer, SynthesizedAudio};
