//! Publication of finished episodes to a static hosting target.

pub mod backend;
pub mod index;
pub mod publisher;

pub use backend::{HostingBackend, MockHostingBackend, RepositoryBackend, UploadRequest};
pub use index::IndexEntry;
pub use publisher::{Publisher, metadata_for};
