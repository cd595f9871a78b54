//! Meeting lifecycle: status machine, event handlers and transcripts.

pub mod lifecycle;
pub mod status;
pub mod transcript;

pub use lifecycle::{LifecycleError, MeetingLifecycle, Outcome};
pub use status::MeetingStatus;
