//! Public types for the Bifrost API.

mod request;
mod resolution;

pub use request::{ResolveRequest, is_video_id};
pub use resolution::{Resolution, SourceLayer};
