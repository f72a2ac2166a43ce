use mcprobe::ForgeData;
use serde::Serialize;

#[derive(Serialize, Debug, Clone)]
pub struct MCPingResponse {
    pub latency: f64,
    pub players: Players,
    pub motd: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    pub version: Version,
    pub chat: ChatStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forge: Option<ForgeData>,
}

#[derive(Serialize, Debug, Clone)]
pub struct Version {
    pub protocol: i64,
    pub broadcast: String,
}

#[derive(Serialize, Debug, Clone)]
pub struct Players {
    pub online: i64,
    pub maximum: i64,
    pub sample: Vec<PlayerSample>,
}

#[derive(Serialize, Debug, Clone)]
pub struct PlayerSample {
    pub uuid: String,
    pub name: String,
}

#[derive(Serialize, Debug, Clone, Copy, Default)]
pub struct ChatStatus {
    pub signing: bool,
    pub preview: bool,
}

#[derive(Serialize, Debug, Clone, Copy)]
pub struct LatencyResponse {
    pub latency: f64,
}

#[derive(Serialize, Debug, Clone)]
pub struct QueryStatusResponse {
    pub latency: f64,
    pub motd: String,
    pub map: String,
    pub players: QueryPlayers,
    pub software: Software,
    pub ip: String,
    pub port: u16,
}

#[derive(Serialize, Debug, Clone)]
pub struct QueryPlayers {
    pub online: i64,
    pub maximum: i64,
    pub list: Vec<String>,
}

#[derive(Serialize, Debug, Clone)]
pub struct Software {
    pub version: String,
    pub brand: String,
    pub plugins: Vec<String>,
}
