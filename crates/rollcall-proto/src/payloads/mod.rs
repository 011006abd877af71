//! Payload types, grouped by the surface that consumes them.

pub mod participant;
pub mod presenter;
