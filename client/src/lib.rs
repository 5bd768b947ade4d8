//! # Arena Client
//!
//! Runs a proxy session of a dodgeball match against a remote authority.
//! The proxy mirrors everything the authority broadcasts, predicts its own
//! pickups and throws, and sends requests for the authority to arbitrate.
//!
//! ## Modules
//!
//! - `network`: UDP transport, connection handshake, heartbeats and the
//!   fixed-rate session loop
//! - `input`: a scripted player that stands in for keyboard and mouse
//!
//! A proxy that is refused or dropped by the server ends with
//! [`shared::SessionError::Disconnected`]; it never continues on its own.

pub mod input;
pub mod network;
