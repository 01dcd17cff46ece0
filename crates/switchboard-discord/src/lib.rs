//! Discord adapter for switchboard.
//!
//! This crate is the only place that speaks Discord. Everything upstream of it
//! works with the platform-neutral [`Message`] model and the [`ChatGateway`]
//! trait.
//!
//! ## Features
//!
//! - **REST client**: channel history pages and message sends
//! - **Gateway**: websocket session delivering inbound events
//! - **Directory**: in-memory guild/channel registry fed by the gateway

mod adapter;
mod client;
pub mod directory;
mod error;
pub mod gateway;
mod types;

pub use adapter::{ChatGateway, DiscordAdapter};
pub use client::{DEFAULT_API_URL, DiscordClient};
pub use directory::GuildDirectory;
pub use error::DiscordError;
pub use gateway::{DEFAULT_GATEWAY_URL, GatewayClient, GatewayEvent, InboundMessage};
pub use types::*;
