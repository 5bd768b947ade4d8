//! # Arena Server
//!
//! Hosts the authority session of a dodgeball match. The session itself lives
//! in the `shared` crate; this crate is the UDP transport around it.
//!
//! ## Tasks
//!
//! - **Network receiver**: decodes datagrams into [`shared::Packet`]s
//! - **Network sender**: sends direct replies and relays session envelopes to
//!   every connected proxy, skipping the one an envelope excludes
//! - **Timeout checker**: drops proxies that stop sending packets
//! - **Session loop**: ticks the authority session at the configured rate
//!
//! Packets from a proxy are only accepted when the envelope's sender matches
//! the participant id bound to the source address.
//!
//! ```rust,no_run
//! use server::network::Server;
//! use shared::collaborators::Silent;
//! use shared::{Collaborators, SessionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let collaborators = Collaborators::headless(42, 0.5, Box::new(Silent));
//!     let mut server =
//!         Server::new("127.0.0.1:8080", SessionConfig::default(), collaborators, 7).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod client_manager;
pub mod network;
