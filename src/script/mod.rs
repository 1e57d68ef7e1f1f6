//! Script synthesis: prompt building, text generation and segmentation.

pub mod generator;
pub mod prompt;
pub mod segmenter;
pub mod synthesizer;

pub use generator::{MockTextGenerator, OpenAiGenerator, TextGenerator};
pub use prompt::{ArticleSelector, GenerationRequest, PromptBuilder, RecencySelector};
pub use synthesizer::ScriptSynthesizer;
