//! The status request understood by servers older than 1.7 (and still answered by newer ones).
//! [Server List Ping: 1.6](https://minecraft.wiki/w/Java_Edition_protocol/Server_List_Ping#1.6)

use std::time::{Duration, Instant};

use crate::{
    Address, ByteBuffer, DEFAULT_TIMEOUT, DEFAULT_TRIES, Error, Pingable, Transport, elapsed_ms,
    java, retry::retry, transport::TcpTransport,
};

const REQUEST: [u8; 3] = [0xFE, 0x01, 0xFA];
const KICK_ID: u8 = 0xFF;
const REPLY_MARKER: &str = "\u{a7}1";

/// Configuration for the legacy status request.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct Legacy {
    /// The server address; the port defaults to 25565.
    pub server_address: String,
    pub timeout: Option<Duration>,
    pub tries: usize,
}

impl Default for Legacy {
    fn default() -> Self {
        Self {
            server_address: String::new(),
            timeout: None,
            tries: DEFAULT_TRIES,
        }
    }
}

impl Legacy {
    pub(crate) fn timeout(&self) -> Duration {
        self.timeout.unwrap_or(DEFAULT_TIMEOUT)
    }
}

impl Pingable for Legacy {
    type Response = LegacyResponse;

    fn ping(self) -> Result<(f64, Self::Response), Error> {
        let address = Address::parse(&self.server_address, java::DEFAULT_PORT)?;
        let socket = address.resolve()?;
        retry(self.tries, None, || {
            let mut conn = TcpTransport::connect(socket, self.timeout())?;
            let response = LegacyClient.read_status(&mut conn)?;
            debug!(%address, latency = response.latency, "legacy status received");
            Ok((response.latency, response))
        })
    }
}

/// The legacy status, as carried in the kick packet the server answers with.
#[derive(Debug, Clone, PartialEq)]
pub struct LegacyResponse {
    pub latency: f64,
    pub protocol: i64,
    pub version_name: String,
    /// The MOTD, with `§` formatting codes left in.
    pub motd: String,
    pub players_online: i64,
    pub players_max: i64,
}

impl LegacyResponse {
    /// Builds the response from the `\0`-separated kick reason.
    ///
    /// # Errors
    /// [`Error::Protocol`] if the reason doesn't start with `§1`, and
    /// [`Error::Validation`] if a field is missing or a number doesn't parse.
    pub fn parse(reason: &str, latency: f64) -> Result<Self, Error> {
        let mut parts = reason.split('\0');
        if parts.next() != Some(REPLY_MARKER) {
            return Err(Error::Protocol("received invalid kick packet reason".to_owned()));
        }
        let mut field = |name: &str| {
            parts
                .next()
                .ok_or_else(|| Error::Validation(format!("legacy status is missing the {name}")))
        };
        let number = |value: &str, name: &str| {
            value
                .parse::<i64>()
                .map_err(|_| Error::Validation(format!("legacy {name} {value:?} is not a number")))
        };

        let protocol = field("protocol")?;
        let version_name = field("version name")?;
        let motd = field("motd")?;
        let online = field("online player count")?;
        let max = field("max player count")?;

        Ok(Self {
            latency,
            protocol: number(protocol, "protocol")?,
            version_name: version_name.to_owned(),
            motd: motd.to_owned(),
            players_online: number(online, "online player count")?,
            players_max: number(max, "max player count")?,
        })
    }
}

/// The legacy exchange: one request, one kick packet.
#[derive(Debug, Clone, Copy, Default)]
pub struct LegacyClient;

impl LegacyClient {
    pub(crate) const fn request(self) -> [u8; 3] {
        REQUEST
    }

    pub(crate) fn check_id(self, id: u8) -> Result<(), Error> {
        if id == KICK_ID {
            Ok(())
        } else {
            Err(Error::Protocol("received invalid packet ID".to_owned()))
        }
    }

    /// Decodes the UTF-16BE reason string of `data`.
    pub(crate) fn finish(self, data: &[u8], elapsed: Duration) -> Result<LegacyResponse, Error> {
        let units: Vec<u16> = data
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        let reason = String::from_utf16(&units)
            .map_err(|_| Error::Protocol("kick reason is not valid UTF-16".to_owned()))?;
        LegacyResponse::parse(&reason, elapsed_ms(elapsed))
    }

    /// # Errors
    /// If the transport fails or the server doesn't answer with a well-formed kick packet.
    pub fn read_status<T: Transport>(self, conn: &mut T) -> Result<LegacyResponse, Error> {
        let start = Instant::now();
        conn.write(&self.request())?;
        self.check_id(crate::transport::exact(conn.read(1)?, 1)?[0])?;
        let len = ByteBuffer::from(crate::transport::exact(conn.read(2)?, 2)?).read_ushort()?;
        let len = usize::from(len) * 2;
        let data = crate::transport::exact(conn.read(len)?, len)?;
        self.finish(&data, start.elapsed())
    }
}
