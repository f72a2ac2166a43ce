//! Implementation of the Query protocol, a `GameSpy4` derivative answered by
//! servers with `enable-query=true`.
//! [Query](https://minecraft.wiki/w/Query)

use std::{
    collections::BTreeMap,
    time::{Duration, Instant},
};

use crate::{
    Address, ByteBuffer, DEFAULT_TIMEOUT, DEFAULT_TRIES, Error, Pingable, Transport,
    buffer::decode_latin1,
    elapsed_ms, java,
    retry::retry,
    transport::{MAX_DATAGRAM_SIZE, UdpTransport},
};

const MAGIC: [u8; 2] = [0xFE, 0xFD];
const TYPE_CHALLENGE: u8 = 0x09;
const TYPE_STAT: u8 = 0x00;

/// Type byte and session id echoed at the start of every reply.
const REPLY_HEADER_LEN: usize = 1 + 4;
/// `splitnum\0\x80\0`
const STAT_PREAMBLE_LEN: usize = 11;
/// `player_\0\0`
const PLAYER_SECTION_LEN: usize = 9;

/// Keys that may follow the hostname, used to find where a hostname with
/// embedded nulls ends.
const KEYS_AFTER_HOSTNAME: [&str; 9] = [
    "hostip",
    "hostport",
    "game_id",
    "gametype",
    "map",
    "maxplayers",
    "numplayers",
    "plugins",
    "version",
];

const REQUIRED_KEYS: [&str; 10] = [
    "hostname",
    "gametype",
    "game_id",
    "version",
    "plugins",
    "map",
    "numplayers",
    "maxplayers",
    "hostport",
    "hostip",
];

/// Configuration for querying a server.
///
/// # Examples
///
/// ```
/// use mcprobe::Query;
///
/// let query_config = Query {
///     server_address: "localhost".to_string(),
///     query_port: Some(25566),
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct Query {
    /// The server address, in the same forms [`Java`](crate::Java) accepts.
    pub server_address: String,
    /// Overrides the port of `server_address`, for servers with a separate `query.port`.
    pub query_port: Option<u16>,
    /// The read and write timeouts for the socket.
    pub timeout: Option<Duration>,
    /// How many full exchanges (challenge and stat) to try.
    pub tries: usize,
    /// The session id to send. Random when `None`.
    pub session_id: Option<i32>,
}

impl Default for Query {
    fn default() -> Self {
        Self {
            server_address: String::new(),
            query_port: None,
            timeout: None,
            tries: DEFAULT_TRIES,
            session_id: None,
        }
    }
}

impl Query {
    pub(crate) fn address(&self) -> Result<Address, Error> {
        let mut address = Address::parse(&self.server_address, java::DEFAULT_PORT)?;
        if let Some(port) = self.query_port {
            address.port = port;
        }
        Ok(address)
    }

    pub(crate) fn timeout(&self) -> Duration {
        self.timeout.unwrap_or(DEFAULT_TIMEOUT)
    }
}

impl Pingable for Query {
    type Response = QueryResponse;

    fn ping(self) -> Result<(f64, Self::Response), Error> {
        let address = self.address()?;
        let socket = address.resolve()?;
        retry(self.tries, None, || {
            let mut conn = UdpTransport::connect(socket, self.timeout())?;
            let mut client = QueryClient::new(self.session_id);
            client.handshake(&mut conn)?;
            let start = Instant::now();
            let response = client.read_query(&mut conn)?;
            let latency = elapsed_ms(start.elapsed());
            debug!(%address, latency, players = response.players.online, "query stat received");
            Ok((latency, response))
        })
    }
}

/// The two-phase query exchange: a challenge token request, then the full stat.
#[derive(Debug, Clone)]
pub struct QueryClient {
    session_id: i32,
    challenge: Option<i32>,
}

impl QueryClient {
    /// `session_id` defaults to a random value; servers only keep the low
    /// nibble of each byte, so it is masked with `0x0F0F0F0F` either way.
    #[must_use]
    pub fn new(session_id: Option<i32>) -> Self {
        Self {
            session_id: session_id.unwrap_or_else(rand::random::<i32>) & 0x0F0F_0F0F,
            challenge: None,
        }
    }

    #[must_use]
    pub const fn session_id(&self) -> i32 {
        self.session_id
    }

    /// The challenge token received in the handshake, if any.
    #[must_use]
    pub const fn challenge(&self) -> Option<i32> {
        self.challenge
    }

    fn header(&self, kind: u8) -> ByteBuffer {
        let mut packet = ByteBuffer::new();
        packet.write(&MAGIC);
        packet.write_u8(kind);
        packet.write_int(self.session_id);
        packet
    }

    pub(crate) fn handshake_packet(&self) -> Vec<u8> {
        self.header(TYPE_CHALLENGE).flush()
    }

    pub(crate) fn stat_packet(&self) -> Result<Vec<u8>, Error> {
        let challenge = self.challenge.ok_or_else(|| {
            Error::Protocol("the full stat needs a challenge token from the handshake".to_owned())
        })?;
        let mut packet = self.header(TYPE_STAT);
        packet.write_int(challenge);
        packet.write(&[0; 4]);
        Ok(packet.flush())
    }

    fn reply(datagram: Vec<u8>) -> Result<ByteBuffer, Error> {
        trace!(len = datagram.len(), "query datagram received");
        let mut reply = ByteBuffer::from(datagram);
        reply.skip(REPLY_HEADER_LEN)?;
        Ok(reply)
    }

    pub(crate) fn finish_handshake(&mut self, datagram: Vec<u8>) -> Result<i32, Error> {
        let token = Self::reply(datagram)?.read_ascii()?;
        // Tokens above i32::MAX are sent unsigned and go back on the wire as the same four bytes.
        #[allow(clippy::cast_possible_wrap)]
        let challenge = token
            .parse::<i32>()
            .or_else(|_| token.parse::<u32>().map(|t| t as i32))
            .map_err(|_| Error::Protocol(format!("invalid challenge token {token:?}")))?;
        self.challenge = Some(challenge);
        Ok(challenge)
    }

    pub(crate) fn finish_stat(datagram: Vec<u8>) -> Result<QueryResponse, Error> {
        let mut reply = Self::reply(datagram)?;
        reply.skip(STAT_PREAMBLE_LEN)?;
        let raw = read_pairs(&mut reply)?;
        reply.skip(PLAYER_SECTION_LEN)?;
        let mut players = Vec::new();
        loop {
            let name = reply.read_ascii()?;
            if name.is_empty() {
                break;
            }
            players.push(name);
        }
        QueryResponse::build(raw, players)
    }

    /// Requests a challenge token.
    ///
    /// # Errors
    /// If the transport fails or the reply doesn't hold a number.
    pub fn handshake<T: Transport>(&mut self, conn: &mut T) -> Result<(), Error> {
        conn.write(&self.handshake_packet())?;
        self.finish_handshake(conn.read(MAX_DATAGRAM_SIZE)?)?;
        Ok(())
    }

    /// Requests and parses the full stat.
    ///
    /// # Errors
    /// If no handshake was done, the transport fails, or the reply is malformed or incomplete.
    pub fn read_query<T: Transport>(&self, conn: &mut T) -> Result<QueryResponse, Error> {
        conn.write(&self.stat_packet()?)?;
        Self::finish_stat(conn.read(MAX_DATAGRAM_SIZE)?)
    }
}

/// Reads the null-terminated key/value section up to the empty key.
fn read_pairs(reply: &mut ByteBuffer) -> Result<BTreeMap<String, String>, Error> {
    let mut raw = BTreeMap::new();
    loop {
        let key = reply.read_ascii()?;
        if key.is_empty() {
            reply.skip(1)?;
            return Ok(raw);
        }
        let value = if key == "hostname" {
            read_hostname(reply)?
        } else {
            reply.read_ascii()?
        };
        raw.insert(key, value);
    }
}

/// The server doesn't escape the MOTD, so a hostname can contain null bytes.
/// It ends at the first null that is followed by another known key.
fn read_hostname(reply: &mut ByteBuffer) -> Result<String, Error> {
    let unread = reply.unread();
    let end = unread.iter().enumerate().position(|(i, &b)| {
        b == 0
            && KEYS_AFTER_HOSTNAME
                .iter()
                .any(|key| unread[i + 1..].starts_with(key.as_bytes()))
    });
    match end {
        Some(end) => {
            let hostname = decode_latin1(reply.read(end)?);
            reply.skip(1)?;
            Ok(hostname)
        }
        None => reply.read_ascii(),
    }
}

/// Information about players on the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryPlayers {
    pub online: i64,
    pub max: i64,
    /// Names of the online players.
    pub list: Vec<String>,
}

/// The server software, taken from the `version` and `plugins` keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuerySoftware {
    pub version: String,
    /// The brand of the software, like Paper or Spigot. `vanilla` when no plugins are listed.
    pub brand: String,
    /// The list of plugins. Can be empty if hidden.
    pub plugins: Vec<String>,
}

impl QuerySoftware {
    /// Splits a plugins value like `Paper on 1.20.1: WorldEdit 7.2.15; Essentials 2.20.0`.
    #[must_use]
    pub fn build(version: String, plugins: &str) -> Self {
        if plugins.is_empty() {
            return Self {
                version,
                brand: "vanilla".to_owned(),
                plugins: Vec::new(),
            };
        }
        let (brand, list) = match plugins.split_once(':') {
            Some((brand, list)) => (brand, list.split(';').map(|p| p.trim().to_owned()).collect()),
            None => (plugins, Vec::new()),
        };
        Self {
            version,
            brand: brand.trim().to_owned(),
            plugins: list,
        }
    }
}

/// The full stat response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryResponse {
    /// Every key/value pair the server sent.
    pub raw: BTreeMap<String, String>,
    /// The `hostname` key, which holds the MOTD.
    pub motd: String,
    pub map_name: String,
    pub players: QueryPlayers,
    pub software: QuerySoftware,
    /// The IP the server is listening on, as it reports it.
    pub ip: String,
    pub port: u16,
    /// Always `SMP` on vanilla servers.
    pub game_type: String,
    /// Always `MINECRAFT` on vanilla servers.
    pub game_id: String,
}

impl QueryResponse {
    /// # Errors
    /// [`Error::Validation`] if a key is missing or a numeric value doesn't parse.
    pub fn build(raw: BTreeMap<String, String>, players: Vec<String>) -> Result<Self, Error> {
        if let Some(missing) = REQUIRED_KEYS.iter().find(|key| !raw.contains_key(**key)) {
            return Err(Error::Validation(format!(
                "query response is missing the {missing:?} key"
            )));
        }
        let get = |key: &str| raw.get(key).cloned().unwrap_or_default();
        let number = |key: &str| {
            let value = get(key);
            value
                .trim()
                .parse::<i64>()
                .map_err(|_| Error::Validation(format!("query {key} {value:?} is not a number")))
        };

        let online = number("numplayers")?;
        let max = number("maxplayers")?;
        let port = u16::try_from(number("hostport")?)
            .map_err(|_| Error::Validation("query hostport is out of range".to_owned()))?;

        Ok(Self {
            motd: get("hostname"),
            map_name: get("map"),
            players: QueryPlayers {
                online,
                max,
                list: players,
            },
            software: QuerySoftware::build(get("version"), &get("plugins")),
            ip: get("hostip"),
            port,
            game_type: get("gametype"),
            game_id: get("game_id"),
            raw,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex(s: &str) -> Vec<u8> {
        (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
            .collect()
    }

    const HANDSHAKE_REPLY: &str = "090000000035373033353037373800";

    const STAT_REPLY: &str = concat!(
        "00000000000000000000000000000000686f73746e616d650041204d696e656372616674205365727665720067616d6574797",
        "06500534d500067616d655f6964004d494e4543524146540076657273696f6e00312e3800706c7567696e7300006d61700077",
        "6f726c64006e756d706c61796572730033006d6178706c617965727300323000686f7374706f727400323535363500686f737",
        "46970003139322e3136382e35362e31000001706c617965725f000044696e6e6572626f6e6500446a696e6e69626f6e650053",
        "746576650000",
    );

    fn shaken() -> (QueryClient, ByteBuffer) {
        let mut conn = ByteBuffer::from(hex(HANDSHAKE_REPLY));
        let mut client = QueryClient::new(None);
        client.handshake(&mut conn).unwrap();
        conn.flush();
        (client, conn)
    }

    fn stat(reply: &[u8]) -> QueryResponse {
        let (client, mut conn) = shaken();
        conn.receive(reply);
        client.read_query(&mut conn).unwrap()
    }

    #[test]
    fn handshake() {
        let mut conn = ByteBuffer::from(hex(HANDSHAKE_REPLY));
        let mut client = QueryClient::new(None);
        client.handshake(&mut conn).unwrap();

        let sent = conn.flush();
        assert_eq!(sent[..3], hex("FEFD09"));
        assert_eq!(sent.len(), 7);
        assert_eq!(client.challenge(), Some(570_350_778));
    }

    #[test]
    fn session_id_is_masked_and_reused() {
        let mut conn = ByteBuffer::from(hex(HANDSHAKE_REPLY));
        let mut client = QueryClient::new(Some(0x0101_0101));
        client.handshake(&mut conn).unwrap();
        assert_eq!(conn.flush()[3..], 0x0101_0101_i32.to_be_bytes());

        conn.receive(&hex(STAT_REPLY));
        client.read_query(&mut conn).unwrap();
        let sent = conn.flush();
        assert_eq!(sent[..3], hex("FEFD00"));
        assert_eq!(sent[3..7], 0x0101_0101_i32.to_be_bytes());
        assert_eq!(sent[7..11], 570_350_778_i32.to_be_bytes());
        assert_eq!(sent[11..], [0; 4]);

        for _ in 0..32 {
            assert_eq!(QueryClient::new(None).session_id() & !0x0F0F_0F0F, 0);
        }
    }

    #[test]
    fn stat_requires_challenge() {
        let mut conn = ByteBuffer::from(hex(STAT_REPLY));
        assert!(matches!(
            QueryClient::new(None).read_query(&mut conn),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn reads_stat() {
        let response = stat(&hex(STAT_REPLY));
        let raw: Vec<(&str, &str)> = response
            .raw
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        assert_eq!(
            raw,
            [
                ("game_id", "MINECRAFT"),
                ("gametype", "SMP"),
                ("hostip", "192.168.56.1"),
                ("hostname", "A Minecraft Server"),
                ("hostport", "25565"),
                ("map", "world"),
                ("maxplayers", "20"),
                ("numplayers", "3"),
                ("plugins", ""),
                ("version", "1.8"),
            ]
        );
        assert_eq!(response.players.list, ["Dinnerbone", "Djinnibone", "Steve"]);
        assert_eq!(response.players.online, 3);
        assert_eq!(response.players.max, 20);
        assert_eq!(response.port, 25565);
        assert_eq!(response.motd, "A Minecraft Server");
        assert_eq!(response.software.brand, "vanilla");
        assert!(response.software.plugins.is_empty());
    }

    #[test]
    fn unordered_keys() {
        let response = stat(
            b"\x00\x00\x00\x00\x00GeyserMC\x00\x80\x00hostname\x00Geyser\x00hostip\x001.1.1.1\x00plugins\x00\x00numplayers\
              \x001\x00gametype\x00SMP\x00maxplayers\x00100\x00hostport\x0019132\x00version\x00Geyser\
              \x20(git-master-0fd903e) 1.18.10\x00map\x00Geyser\x00game_id\x00MINECRAFT\x00\x00\x01player_\x00\x00\x00",
        );
        assert_eq!(response.game_id, "MINECRAFT");
        assert_eq!(response.motd, "Geyser");
        assert_eq!(response.software.version, "Geyser (git-master-0fd903e) 1.18.10");
        assert!(response.players.list.is_empty());
    }

    #[test]
    fn hostname_with_nulls() {
        let response = stat(
            b"\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00hostname\x00\x00*K\xd5\x00gametype\x00SMP\
              \x00game_id\x00MINECRAFT\x00version\x001.16.5\x00plugins\x00Paper on 1.16.5-R0.1-SNAPSHOT\x00map\x00world\
              \x00numplayers\x000\x00maxplayers\x0020\x00hostport\x0025565\x00hostip\x00127.0.1.1\x00\x00\x01player_\x00\
              \x00\x00",
        );
        assert_eq!(response.motd, "\0*K\u{d5}");
        assert_eq!(response.software.brand, "Paper on 1.16.5-R0.1-SNAPSHOT");
        assert!(response.software.plugins.is_empty());
    }

    #[test]
    fn hostname_starting_with_null() {
        let response = stat(&hex(concat!(
            "00000000000000000000000000000000686f73746e616d6500006f746865720067616d657479706500534d500067616d655f6964004d",
            "494e4543524146540076657273696f6e00312e31382e3100706c7567696e7300006d617000776f726c64006e756d706c617965727300",
            "30006d6178706c617965727300323000686f7374706f727400323535363500686f73746970003137322e31372e302e32000001706c61",
            "7965725f000000",
        )));
        assert_eq!(response.game_id, "MINECRAFT");
        assert_eq!(response.motd, "\0other");
    }

    #[test]
    fn missing_key_is_invalid() {
        let mut raw: BTreeMap<String, String> = REQUIRED_KEYS
            .iter()
            .map(|k| ((*k).to_owned(), "1".to_owned()))
            .collect();
        assert!(QueryResponse::build(raw.clone(), Vec::new()).is_ok());

        raw.remove("hostip");
        assert!(matches!(
            QueryResponse::build(raw.clone(), Vec::new()),
            Err(Error::Validation(_))
        ));

        raw.insert("hostip".to_owned(), "1".to_owned());
        raw.insert("numplayers".to_owned(), "many".to_owned());
        assert!(matches!(
            QueryResponse::build(raw, Vec::new()),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn plugin_list() {
        let software = QuerySoftware::build(
            "1.20.1".to_owned(),
            "Paper on 1.20.1: WorldEdit 7.2.15; Essentials 2.20.0",
        );
        assert_eq!(software.brand, "Paper on 1.20.1");
        assert_eq!(software.plugins, ["WorldEdit 7.2.15", "Essentials 2.20.0"]);
    }
}
