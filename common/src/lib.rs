//! Common code shared between `face_gate` and `gate_client`.
pub mod protocol;

/// Error type.
pub type Error = Box<dyn std::error::Error>;
