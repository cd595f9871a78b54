//! API route modules.

pub mod directory;
pub mod meetings;
pub mod webhook;
