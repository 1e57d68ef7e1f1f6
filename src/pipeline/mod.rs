//! Episode pipeline: the state machine, its persistence and the orchestrator
//! that drives the four stages.

pub mod episode;
pub mod orchestrator;
pub mod progress;
pub mod store;
pub mod types;

pub use episode::{Episode, EpisodeState, EpisodeWarning, Stage, StageFailure};
pub use orchestrator::{Orchestrator, RunHandle, Stages};
pub use progress::{CollectingReporter, LogReporter, ProgressEvent, ProgressReporter};
pub use store::{EpisodeStore, FileEpisodeStore, MemoryEpisodeStore};
pub use types::{
    Article, ArticleSet, AudioArtifact, EpisodeMetadata, PublishResult, Script, Segment,
    UploadReceipt,
};
