//! Application core: board actions, zero transport knowledge.
//!
//! Decoded [`actions`] run through the [`service`] against the board
//! port traits defined in [`ports`], keeping this layer fully testable
//! with a mock board.

pub mod actions;
pub mod events;
pub mod port_setup;
pub mod ports;
pub mod service;
