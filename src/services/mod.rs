//! Services used by a session
pub mod persistent_state;
pub mod smarteq;
