//! Request handlers.

pub mod health;
pub mod jobs;
pub mod media;
pub mod upload;

pub use health::*;
pub use jobs::*;
pub use media::*;
pub use upload::*;
