//! API services.

pub mod cleanup;
pub mod metadata;
pub mod status;

pub use cleanup::CleanupScheduler;
pub use metadata::{MetadataService, UploadTicket};
pub use status::{JobStatusResolver, PollOutcome};
