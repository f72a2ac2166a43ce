//! Java Edition server list ping: handshake, status request and ping.
//! [Server List Ping](https://minecraft.wiki/w/Java_Edition_protocol/Server_List_Ping)

use std::time::{Duration, Instant};

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    Address, ByteBuffer, DEFAULT_TIMEOUT, DEFAULT_TRIES, Error, ForgeData, Pingable, Transport,
    buffer::VarIntDecoder,
    elapsed_ms,
    retry::retry,
    transport::{TcpTransport, exact},
};

/// The default port of a Java Edition server.
pub const DEFAULT_PORT: u16 = 25565;

/// Protocol version sent in the handshake when none is configured (1.8).
pub const DEFAULT_PROTOCOL_VERSION: i32 = 47;

const HANDSHAKE_ID: i32 = 0;
const STATUS_ID: i32 = 0;
const PING_ID: i32 = 1;
const NEXT_STATE_STATUS: i32 = 1;

/// Where a Java server lives and how to talk to it.
///
/// # Examples
///
/// ```
/// use mcprobe::Java;
/// use std::time::Duration;
///
/// let java_config = Java {
///     server_address: "mc.hypixel.net".into(),
///     timeout: Some(Duration::from_secs(2)),
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct Java {
    /// The java server address.
    ///
    /// Host or IP with an optional `:port`. Without a port, the async client looks for a
    /// `_minecraft._tcp` SRV record before falling back to 25565.
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
    /// The connect, read and write timeout. Defaults to [`DEFAULT_TIMEOUT`].
    pub timeout: Option<Duration>,
    /// How many connections to try before giving up.
    pub tries: usize,
    /// The protocol version to announce in the handshake.
    pub protocol_version: i32,
    /// Token to send in the ping packet. Random when `None`.
    pub ping_token: Option<i64>,
}

impl Default for Java {
    fn default() -> Self {
        Self {
            server_address: String::new(),
            timeout: None,
            tries: DEFAULT_TRIES,
            protocol_version: DEFAULT_PROTOCOL_VERSION,
            ping_token: None,
        }
    }
}

impl Java {
    pub(crate) fn timeout(&self) -> Duration {
        self.timeout.unwrap_or(DEFAULT_TIMEOUT)
    }

    /// Measures the latency with a ping packet only, without asking for the status.
    ///
    /// Many non-vanilla servers don't answer a ping that isn't preceded by a
    /// status request; use the latency returned by [`get_status`](crate::get_status) for those.
    ///
    /// # Errors
    /// If every attempt failed.
    pub fn test_ping(&self) -> Result<f64, Error> {
        let address = Address::parse(&self.server_address, DEFAULT_PORT)?;
        let socket = address.resolve()?;
        retry(self.tries, None, || {
            let mut conn = TcpTransport::connect(socket, self.timeout())?;
            let mut client = JavaClient::new(address.clone(), self.protocol_version, self.ping_token);
            client.handshake(&mut conn)?;
            client.test_ping(&mut conn)
        })
    }
}

impl Pingable for Java {
    type Response = JavaResponse;

    fn ping(self) -> Result<(f64, Self::Response), Error> {
        let address = Address::parse(&self.server_address, DEFAULT_PORT)?;
        let socket = address.resolve()?;
        retry(self.tries, None, || {
            let mut conn = TcpTransport::connect(socket, self.timeout())?;
            let mut client = JavaClient::new(address.clone(), self.protocol_version, self.ping_token);
            client.handshake(&mut conn)?;
            let response = client.read_status(&mut conn)?;
            debug!(%address, latency = response.latency, "java status received");
            Ok((response.latency, response))
        })
    }
}

/// Where a [`JavaClient`] is in the status exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JavaState {
    Idle,
    HandshakeSent,
    StatusRequested,
    PingRequested,
    Completed,
    Failed,
}

/// The Java status protocol state machine for a single connection.
///
/// Packets are built and responses decoded here; the blocking drivers below
/// and the tokio drivers in [`crate::tokio`] only move the bytes.
#[derive(Debug, Clone)]
pub struct JavaClient {
    address: Address,
    version: i32,
    ping_token: i64,
    state: JavaState,
}

impl JavaClient {
    /// `ping_token` defaults to a random non-negative 63-bit value.
    #[must_use]
    pub fn new(address: Address, version: i32, ping_token: Option<i64>) -> Self {
        Self {
            address,
            version,
            ping_token: ping_token.unwrap_or_else(|| rand::rng().random_range(0..i64::MAX)),
            state: JavaState::Idle,
        }
    }

    #[must_use]
    pub const fn state(&self) -> JavaState {
        self.state
    }

    #[must_use]
    pub const fn ping_token(&self) -> i64 {
        self.ping_token
    }

    fn expect(&mut self, allowed: &[JavaState], next: JavaState) -> Result<(), Error> {
        if !allowed.contains(&self.state) {
            return Err(Error::Protocol(format!(
                "cannot move from {:?} to {next:?}",
                self.state
            )));
        }
        self.state = next;
        Ok(())
    }

    fn settle<T>(&mut self, result: Result<T, Error>) -> Result<T, Error> {
        self.state = if result.is_ok() {
            JavaState::Completed
        } else {
            JavaState::Failed
        };
        result
    }

    fn envelope(packet: &mut ByteBuffer) -> Result<Vec<u8>, Error> {
        let mut framed = ByteBuffer::new();
        framed.write_buffer(packet)?;
        Ok(framed.flush())
    }

    /// The length-prefixed handshake packet announcing a status request.
    pub(crate) fn begin_handshake(&mut self) -> Result<Vec<u8>, Error> {
        self.expect(&[JavaState::Idle], JavaState::HandshakeSent)?;
        let mut packet = ByteBuffer::new();
        packet.write_varint(HANDSHAKE_ID);
        packet.write_varint(self.version);
        packet.write_utf(&self.address.host)?;
        packet.write_ushort(self.address.port);
        packet.write_varint(NEXT_STATE_STATUS);
        Self::envelope(&mut packet)
    }

    pub(crate) fn begin_status(&mut self) -> Result<Vec<u8>, Error> {
        self.expect(&[JavaState::HandshakeSent], JavaState::StatusRequested)?;
        let mut packet = ByteBuffer::new();
        packet.write_varint(STATUS_ID);
        Self::envelope(&mut packet)
    }

    /// Vanilla servers also answer a ping on a connection that already returned its status.
    pub(crate) fn begin_ping(&mut self) -> Result<Vec<u8>, Error> {
        self.expect(
            &[JavaState::HandshakeSent, JavaState::Completed],
            JavaState::PingRequested,
        )?;
        let mut packet = ByteBuffer::new();
        packet.write_varint(PING_ID);
        packet.write_long(self.ping_token);
        Self::envelope(&mut packet)
    }

    pub(crate) fn finish_status(
        &mut self,
        response: Result<ByteBuffer, Error>,
        elapsed: Duration,
    ) -> Result<JavaResponse, Error> {
        let result = response.and_then(|response| Self::parse_status(response, elapsed_ms(elapsed)));
        self.settle(result)
    }

    pub(crate) fn finish_ping(
        &mut self,
        response: Result<ByteBuffer, Error>,
        elapsed: Duration,
    ) -> Result<f64, Error> {
        let token = self.ping_token;
        let result = response.and_then(|mut response| {
            if response.read_varint()? != PING_ID {
                return Err(Error::Protocol(
                    "received invalid ping response packet".to_owned(),
                ));
            }
            let received = response.read_long()?;
            if received != token {
                return Err(Error::Protocol(format!(
                    "received mangled ping response (expected token {token}, got {received})"
                )));
            }
            Ok(elapsed_ms(elapsed))
        });
        self.settle(result)
    }

    fn parse_status(mut response: ByteBuffer, latency: f64) -> Result<JavaResponse, Error> {
        if response.read_varint()? != STATUS_ID {
            return Err(Error::Protocol(
                "received invalid status response packet".to_owned(),
            ));
        }
        let text = response.read_utf()?;
        trace!(len = text.len(), "status JSON received");
        let raw: Value = serde_json::from_str(&text)
            .map_err(|_| Error::Protocol("received invalid JSON".to_owned()))?;
        JavaResponse::build(raw, latency)
    }

    /// Sends the handshake packet.
    ///
    /// # Errors
    /// If the client isn't idle or the write fails.
    pub fn handshake<T: Transport>(&mut self, conn: &mut T) -> Result<(), Error> {
        let packet = self.begin_handshake()?;
        conn.write(&packet)
    }

    /// Requests the status and waits for the response.
    ///
    /// # Errors
    /// If the handshake wasn't sent, the transport fails, or the response is malformed.
    pub fn read_status<T: Transport>(&mut self, conn: &mut T) -> Result<JavaResponse, Error> {
        let request = self.begin_status()?;
        let start = Instant::now();
        let response = conn.write(&request).and_then(|()| read_envelope(conn));
        self.finish_status(response, start.elapsed())
    }

    /// Sends the ping token and measures how long the echo takes, in milliseconds.
    ///
    /// # Errors
    /// If the transport fails, or the response isn't a pong carrying our token.
    pub fn test_ping<T: Transport>(&mut self, conn: &mut T) -> Result<f64, Error> {
        let request = self.begin_ping()?;
        let start = Instant::now();
        let response = conn.write(&request).and_then(|()| read_envelope(conn));
        self.finish_ping(response, start.elapsed())
    }
}

/// Largest packet the protocol can frame (a three byte length prefix).
pub(crate) const MAX_PACKET_LEN: usize = (1 << 21) - 1;

/// The length prefix of a packet, decoded as it arrives one byte at a time.
///
/// Drivers only do the reads: [`push`](Self::push) the single bytes until it
/// yields the body length, then hand the body to [`body`](Self::body).
#[derive(Debug)]
pub(crate) struct Envelope(VarIntDecoder);

impl Envelope {
    pub(crate) const fn new() -> Self {
        Self(VarIntDecoder::varint())
    }

    /// Feeds the result of a one byte read. Yields the body length once the prefix ends.
    pub(crate) fn push(&mut self, chunk: Vec<u8>) -> Result<Option<usize>, Error> {
        let byte = exact(chunk, 1)?[0];
        let Some(bits) = self.0.push(byte)? else {
            return Ok(None);
        };
        let len = usize::try_from(VarIntDecoder::as_i32(bits))?;
        if len > MAX_PACKET_LEN {
            return Err(Error::Protocol(format!(
                "packet of {len} bytes is larger than the protocol allows"
            )));
        }
        Ok(Some(len))
    }

    pub(crate) fn body(chunk: Vec<u8>, len: usize) -> Result<ByteBuffer, Error> {
        Ok(ByteBuffer::from(exact(chunk, len)?))
    }
}

/// Reads one length-prefixed packet from a stream.
pub(crate) fn read_envelope<T: Transport>(conn: &mut T) -> Result<ByteBuffer, Error> {
    let mut envelope = Envelope::new();
    let len = loop {
        if let Some(len) = envelope.push(conn.read(1)?)? {
            break len;
        }
    };
    Envelope::body(conn.read(len)?, len)
}

/// The server status response
///
/// More information can be found [here](https://minecraft.wiki/w/Java_Edition_protocol/Server_List_Ping).
#[derive(Debug, Clone, PartialEq)]
pub struct JavaResponse {
    /// Time between sending the status request and receiving the response, in milliseconds.
    pub latency: f64,
    /// The version of the server.
    pub version: Version,
    /// Player counts and sample.
    pub players: Players,
    /// The MOTD.
    pub description: Chat,
    /// The server icon (a Base64-encoded PNG data URL)
    pub favicon: Option<String>,
    /// Mod information, for Forge servers.
    pub forge_data: Option<ForgeData>,
    /// Whether chat messages must be signed.
    pub enforces_secure_chat: Option<bool>,
    /// Whether chat previews are enabled.
    pub previews_chat: Option<bool>,
    /// The JSON document as the server sent it.
    pub raw: Value,
}

#[derive(Deserialize)]
struct StatusFields {
    version: Version,
    players: Players,
    #[serde(default)]
    description: Chat,
    favicon: Option<String>,
    #[serde(rename = "enforcesSecureChat")]
    enforces_secure_chat: Option<bool>,
    #[serde(rename = "previewsChat")]
    previews_chat: Option<bool>,
}

impl JavaResponse {
    /// Projects the raw JSON tree onto the typed response.
    ///
    /// # Errors
    /// [`Error::Validation`] if `players` or `version` are missing or mistyped,
    /// or if the embedded forge data is invalid.
    pub fn build(raw: Value, latency: f64) -> Result<Self, Error> {
        let fields = StatusFields::deserialize(&raw)
            .map_err(|e| Error::Validation(format!("invalid status response: {e}")))?;
        let forge_data = ["forgeData", "modinfo"]
            .iter()
            .find_map(|key| raw.get(key).filter(|v| !v.is_null()))
            .map(ForgeData::build)
            .transpose()?;

        Ok(Self {
            latency,
            version: fields.version,
            players: fields.players,
            description: fields.description,
            favicon: fields.favicon,
            forge_data,
            enforces_secure_chat: fields.enforces_secure_chat,
            previews_chat: fields.previews_chat,
            raw,
        })
    }

    /// Decodes the favicon data URL into PNG bytes.
    #[must_use]
    pub fn icon_png(&self) -> Option<Vec<u8>> {
        use base64::Engine;

        let favicon = self.favicon.as_deref()?;
        let data = favicon
            .strip_prefix("data:image/png;base64,")
            .unwrap_or(favicon);
        base64::engine::general_purpose::STANDARD
            .decode(data.replace('\n', ""))
            .ok()
    }
}

/// The `version` object of a status response.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Version {
    /// Free-form; proxies often put their own branding here.
    pub name: String,
    /// See [Protocol Version Numbers](https://minecraft.wiki/w/Protocol_version)
    pub protocol: i64,
}

/// One entry of `players.sample`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Player {
    /// The name of the player.
    pub name: String,
    /// The player's UUID
    pub id: String,
}

/// The `players` object of a status response.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Players {
    /// The max amount of players.
    pub max: i64,
    /// Connected players.
    pub online: i64,
    /// Up to a dozen online players. Often missing, and sometimes abused as a
    /// second MOTD.
    pub sample: Option<Vec<Player>>,
}

/// A chat component as used in the MOTD; only the text content is interpreted.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum Chat {
    String(String),
    List(Vec<Chat>),
    Component(TextComponent),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct TextComponent {
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translate: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra: Vec<Chat>,
}

impl Default for Chat {
    fn default() -> Self {
        Self::String(String::new())
    }
}

impl Chat {
    /// The text of this component and its children, formatting codes included.
    #[must_use]
    pub fn to_plain(&self) -> String {
        let mut out = String::new();
        self.push_plain(&mut out);
        out
    }

    fn push_plain(&self, out: &mut String) {
        match self {
            Self::String(s) => out.push_str(s),
            Self::List(parts) => parts.iter().for_each(|part| part.push_plain(out)),
            Self::Component(component) => {
                if component.text.is_empty() {
                    if let Some(key) = &component.translate {
                        out.push_str(key);
                    }
                } else {
                    out.push_str(&component.text);
                }
                component.extra.iter().for_each(|part| part.push_plain(out));
            }
        }
    }
}
