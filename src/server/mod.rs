//! TCP listener and application wiring.

pub mod listener;
