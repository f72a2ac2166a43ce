#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]
//! `mcprobe` implements the protocols used to ask a Minecraft server about
//! itself: the Java Edition status/ping exchange, the pre-1.7 legacy status
//! packet, the Bedrock (`RakNet`) unconnected ping and the `GameSpy4`-derived
//! Query protocol.
//!
//! Every client is written once against a small byte source/sink
//! ([`Transport`], or [`tokio::AsyncTransport`] for the async variants), so the
//! framing and decoding logic is shared between the blocking and the tokio
//! implementations.
//!
//! The main API surface is [`get_status`] and [`tokio::get_status`].

#[macro_use]
extern crate tracing;

pub mod address;
pub mod buffer;
pub mod forge;
pub mod retry;
pub mod tokio;
pub mod transport;

mod bedrock;
mod java;
mod legacy;
mod query;

use std::time::Duration;

pub use address::Address;
pub use bedrock::{Bedrock, BedrockClient, BedrockEdition, BedrockResponse};
pub use buffer::ByteBuffer;
pub use forge::{ForgeChannel, ForgeData, ForgeMod};
pub use java::{
    Chat, Java, JavaClient, JavaResponse, JavaState, Player, Players, TextComponent, Version,
};
pub use legacy::{Legacy, LegacyClient, LegacyResponse};
pub use query::{Query, QueryClient, QueryPlayers, QueryResponse, QuerySoftware};
pub use transport::Transport;

/// Timeout applied to every socket operation when a configuration doesn't set one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

/// How many times a round trip is attempted before the last error is returned.
pub const DEFAULT_TRIES: usize = 3;

/// Errors that can occur when talking to a server.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The server sent bytes that don't follow the protocol.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// The response was well-formed but is missing data we require.
    #[error("invalid response: {0}")]
    Validation(String),
    #[error("the server did not respond in time")]
    Timeout,
    #[error("VarInt length was negative or too large")]
    InvalidVarInt(#[from] std::num::TryFromIntError),
    #[error("an I/O error occurred: {0}")]
    IoError(#[from] std::io::Error),
    #[error("an invalid address was provided")]
    InvalidAddress,
    #[error("DNS lookup for the host provided failed")]
    DnsLookupFailed,
}

/// A server configuration that knows how to ask for a status.
pub trait Pingable {
    /// What a successful exchange yields.
    type Response;

    /// Ping the entity, gathering the latency (in milliseconds) and response.
    ///
    /// # Errors
    /// If every attempt at the round trip failed.
    fn ping(self) -> Result<(f64, Self::Response), Error>;
}

/// Runs the exchange described by a [`Pingable`] configuration, blocking the thread.
///
/// Returns `(latency_ms, response)` where response is a response type of the `Pingable` configuration.
///
/// # Examples
///
/// Ping a Java server, trying once:
///
/// ```no_run
/// let (latency, response) = mcprobe::get_status(mcprobe::Java {
///     server_address: "mc.hypixel.net".into(),
///     tries: 1,
///     ..Default::default()
/// })?;
/// # Ok::<(), mcprobe::Error>(())
/// ```
///
/// Query a server that has `enable-query` turned on:
///
/// ```no_run
/// let (_, response) = mcprobe::get_status(mcprobe::Query {
///     server_address: "localhost".into(),
///     ..Default::default()
/// })?;
/// println!("{:?}", response.players.list);
/// # Ok::<(), mcprobe::Error>(())
/// ```
///
/// # Errors
/// If the server status cannot be received
pub fn get_status<P: Pingable>(pingable: P) -> Result<(f64, P::Response), Error> {
    pingable.ping()
}

pub(crate) fn elapsed_ms(elapsed: Duration) -> f64 {
    elapsed.as_secs_f64() * 1000.0
}
