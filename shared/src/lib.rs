//! Shared collaborators for the topometry measurement pipeline.
//!
//! Everything that touches the outside world lives here: frame sources,
//! image format conversions, and the settings document persisted between
//! sessions.

pub mod camera_interface;
pub mod config_storage;
pub mod image_proc;
pub mod settings_record;
