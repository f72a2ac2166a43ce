//! Bedrock Edition status over the `RakNet` unconnected ping.
//! See [RakNet: Unconnected Ping](https://minecraft.wiki/w/RakNet#Unconnected_Ping)

use std::{
    net::{Ipv4Addr, Ipv6Addr, SocketAddr},
    time::{Duration, Instant},
};

use crate::{
    Address, ByteBuffer, DEFAULT_TIMEOUT, DEFAULT_TRIES, Error, Pingable, Transport, elapsed_ms,
    retry::retry,
    transport::{MAX_DATAGRAM_SIZE, UdpTransport},
};

/// The magic bytes every offline `RakNet` message carries.
/// See [RakNet: Data Types](https://minecraft.wiki/w/RakNet#Data_types)
pub const OFFLINE_MESSAGE_DATA_ID: &[u8] = &[
    0x00, 0xff, 0xff, 0x00, 0xfe, 0xfe, 0xfe, 0xfe, 0xfd, 0xfd, 0xfd, 0xfd, 0x12, 0x34, 0x56, 0x78,
];

/// Port a Bedrock server listens on unless told otherwise.
pub const DEFAULT_PORT: u16 = 19132;

const UNCONNECTED_PING_ID: u8 = 0x01;

/// Id byte, time, server GUID, magic and the payload length.
const PONG_HEADER_LEN: usize = 1 + 8 + 8 + 16 + 2;

/// How to reach a Bedrock server and how hard to try.
///
/// # Examples
///
/// ```
/// use mcprobe::Bedrock;
/// use std::time::Duration;
///
/// let config = Bedrock {
///     server_address: "play.nethergames.org:19132".into(),
///     timeout: Some(Duration::from_secs(2)),
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct Bedrock {
    /// Host or IP, with an optional `:port` (19132 when absent).
    /// Hostnames are looked up in DNS.
    ///
    /// # Examples
    ///
    /// ```text
    /// test.server.com
    /// test.server.com:19384
    /// 13.212.76.209
    /// 13.212.76.209:23193
    /// ```
    pub server_address: String,
    /// Bound on each send and receive, [`DEFAULT_TIMEOUT`] when unset.
    pub timeout: Option<Duration>,
    /// Pings sent before giving up. Datagrams get lost, so more than one is
    /// usually worth it.
    pub tries: usize,
    /// Pause between attempts.
    pub wait_to_try: Option<Duration>,
    /// Local addresses tried, in order, when binding the UDP socket.
    pub socket_addresses: Vec<SocketAddr>,
}

impl Default for Bedrock {
    fn default() -> Self {
        Self {
            server_address: String::new(),
            timeout: None,
            tries: DEFAULT_TRIES,
            wait_to_try: Some(Duration::from_millis(10)),
            socket_addresses: vec![
                SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
                SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0)),
            ],
        }
    }
}

impl Bedrock {
    pub(crate) fn timeout(&self) -> Duration {
        self.timeout.unwrap_or(DEFAULT_TIMEOUT)
    }
}

impl Pingable for Bedrock {
    type Response = BedrockResponse;

    fn ping(self) -> Result<(f64, Self::Response), Error> {
        let address = Address::parse(&self.server_address, DEFAULT_PORT)?;
        let socket = address.resolve()?;
        retry(self.tries, self.wait_to_try, || {
            let mut conn = UdpTransport::connect_from(socket, &self.socket_addresses, self.timeout())?;
            let response = BedrockClient.read_status(&mut conn)?;
            debug!(%address, latency = response.latency, "bedrock pong received");
            Ok((response.latency, response))
        })
    }
}

/// Which flavour of Bedrock the server runs.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum BedrockEdition {
    PocketEdition,
    EducationEdition,
    /// Anything we don't recognise, kept verbatim.
    Other(String),
}

impl std::fmt::Display for BedrockEdition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PocketEdition => f.write_str("MCPE"),
            Self::EducationEdition => f.write_str("MCEE"),
            Self::Other(s) => f.write_str(s),
        }
    }
}

impl From<String> for BedrockEdition {
    fn from(edition: String) -> Self {
        match edition.to_lowercase().as_ref() {
            "mcpe" => Self::PocketEdition,
            "mcee" => Self::EducationEdition,
            _ => Self::Other(edition),
        }
    }
}

/// The fields of an unconnected pong's server string.
///
/// See [RakNet: Unconnected Pong](https://minecraft.wiki/w/RakNet#Unconnected_Pong)
#[derive(Clone, Debug, PartialEq)]
pub struct BedrockResponse {
    /// Time between sending the ping and receiving the pong, in milliseconds.
    pub latency: f64,
    /// The server's edition.
    pub edition: BedrockEdition,
    /// First MOTD line, the one clients actually show.
    pub motd_1: String,
    /// Network protocol number, e.g. 594.
    pub protocol_version: i64,
    /// Game version string, e.g. `1.20.1`.
    pub version_name: String,
    /// Players currently connected.
    pub players_online: i64,
    /// Player slots.
    pub players_max: i64,
    /// The server GUID, kept as sent since servers disagree on its signedness.
    pub server_id: Option<String>,
    /// Second MOTD line.
    ///
    /// Vanilla servers put the world name here; some proxies use it to
    /// advertise their software (e.g. PocketMine-MP).
    pub motd_2: Option<String>,
    /// Default game mode name, such as `Survival`.
    pub game_mode: Option<String>,
    /// `game_mode` as a number.
    pub game_mode_id: Option<i64>,
    /// Game port on IPv4.
    pub port_v4: Option<u16>,
    /// Game port on IPv6.
    pub port_v6: Option<u16>,
}

fn required<'a>(field: Option<&'a str>, name: &str) -> Result<&'a str, Error> {
    field.ok_or_else(|| Error::Validation(format!("bedrock pong is missing the {name}")))
}

fn required_number(field: Option<&str>, name: &str) -> Result<i64, Error> {
    let field = required(field, name)?;
    field
        .trim()
        .parse()
        .map_err(|_| Error::Validation(format!("bedrock {name} {field:?} is not a number")))
}

impl BedrockResponse {
    /// Splits the pong's server string on `;`. Fields are positional: edition,
    /// MOTD, protocol, version name, online, max, then the optional server id,
    /// second MOTD line, game mode (name and number) and the two ports.
    ///
    /// # Errors
    /// [`Error::Validation`] if one of the first six fields is missing, or a
    /// numeric one among them doesn't parse.
    pub fn extract(payload: &str, latency: f64) -> Result<Self, Error> {
        let mut parts = payload.split(';');

        let edition = required(parts.next(), "edition")?.to_owned().into();
        let motd_1 = required(parts.next(), "motd")?.to_owned();
        let protocol_version = required_number(parts.next(), "protocol version")?;
        let version_name = required(parts.next(), "version name")?.to_owned();
        let players_online = required_number(parts.next(), "online player count")?;
        let players_max = required_number(parts.next(), "max player count")?;

        Ok(Self {
            latency,
            edition,
            motd_1,
            protocol_version,
            version_name,
            players_online,
            players_max,
            server_id: parts.next().map(ToOwned::to_owned),
            motd_2: parts.next().map(ToOwned::to_owned),
            game_mode: parts.next().map(ToOwned::to_owned),
            game_mode_id: parts.next().and_then(|s| s.parse().ok()),
            port_v4: parts.next().and_then(|s| s.parse().ok()),
            port_v6: parts.next().and_then(|s| s.parse().ok()),
        })
    }
}

/// The 33-byte unconnected ping: id, a zero timestamp, the magic and a zero client GUID.
fn unconnected_ping() -> Vec<u8> {
    let mut buf = ByteBuffer::new();
    buf.write_u8(UNCONNECTED_PING_ID);
    buf.write_ulong(0);
    buf.write(OFFLINE_MESSAGE_DATA_ID);
    buf.write_ulong(0);
    buf.flush()
}

/// Pulls the server string out of an unconnected pong datagram.
///
/// The id byte and the magic aren't checked. The payload length is
/// clamped to what the datagram actually holds.
fn pong_payload(datagram: &[u8]) -> Result<String, Error> {
    if datagram.len() < PONG_HEADER_LEN {
        return Err(Error::Protocol(format!(
            "bedrock pong is {} bytes, shorter than its {PONG_HEADER_LEN} byte header",
            datagram.len()
        )));
    }
    let mut buf = ByteBuffer::from(datagram);
    buf.skip(PONG_HEADER_LEN - 2)?;
    let len = usize::from(buf.read_ushort()?).min(buf.remaining());
    String::from_utf8(buf.read(len)?.to_vec())
        .map_err(|e| Error::Protocol(format!("bedrock pong payload is not UTF-8: {e}")))
}

/// The Bedrock unconnected ping exchange. It carries no state: one datagram
/// out, one datagram back.
#[derive(Debug, Clone, Copy, Default)]
pub struct BedrockClient;

impl BedrockClient {
    pub(crate) fn request(self) -> Vec<u8> {
        unconnected_ping()
    }

    pub(crate) fn finish(
        self,
        datagram: Result<Vec<u8>, Error>,
        elapsed: Duration,
    ) -> Result<BedrockResponse, Error> {
        let datagram = datagram?;
        trace!(len = datagram.len(), "bedrock datagram received");
        BedrockResponse::extract(&pong_payload(&datagram)?, elapsed_ms(elapsed))
    }

    /// Sends the ping and decodes the pong.
    ///
    /// # Errors
    /// If the transport fails or the pong is short or incomplete.
    pub fn read_status<T: Transport>(self, conn: &mut T) -> Result<BedrockResponse, Error> {
        let start = Instant::now();
        let datagram = conn
            .write(&self.request())
            .and_then(|()| conn.read(MAX_DATAGRAM_SIZE));
        self.finish(datagram, start.elapsed())
    }
}
