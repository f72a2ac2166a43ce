use std::{future::Future, time::Duration};

use mcprobe::{Bedrock, Java, Legacy, Query};
use tokio::select;

use crate::{
    Failure, Limits,
    structures::{
        ChatStatus, LatencyResponse, MCPingResponse, PlayerSample, Players, QueryPlayers,
        QueryStatusResponse, Software, Version,
    },
};

/// Gives up on `ping` once the request deadline passes, whatever its own timeouts are.
async fn within<T>(
    deadline: Duration,
    ping: impl Future<Output = Result<T, mcprobe::Error>>,
) -> Result<T, Failure> {
    let sleep_future = tokio::time::sleep(deadline);
    #[allow(clippy::redundant_pub_crate)]
    let value = select! {
        val = ping => val?,
        () = sleep_future => return Err(Failure::TimedOut),
    };
    Ok(value)
}

fn java(address: String, limits: Limits) -> Java {
    Java {
        server_address: address,
        timeout: Some(limits.ping_timeout),
        tries: 1,
        ..Default::default()
    }
}

pub async fn ping_java(address: String, limits: Limits) -> Result<MCPingResponse, Failure> {
    let (latency, response) =
        within(limits.deadline, mcprobe::tokio::get_status(java(address, limits))).await?;
    let sample = response
        .players
        .sample
        .unwrap_or_default()
        .into_iter()
        .map(|player| PlayerSample {
            uuid: player.id,
            name: player.name,
        })
        .collect();
    Ok(MCPingResponse {
        latency,
        players: Players {
            online: response.players.online,
            maximum: response.players.max,
            sample,
        },
        motd: response.description.to_plain(),
        icon: response.favicon,
        version: Version {
            protocol: response.version.protocol,
            broadcast: response.version.name,
        },
        chat: ChatStatus {
            signing: response.enforces_secure_chat.unwrap_or(false),
            preview: response.previews_chat.unwrap_or(false),
        },
        forge: response.forge_data,
    })
}

pub async fn ping_java_latency(address: String, limits: Limits) -> Result<LatencyResponse, Failure> {
    let config = java(address, limits);
    let latency = within(limits.deadline, mcprobe::tokio::test_ping(&config)).await?;
    Ok(LatencyResponse { latency })
}

pub async fn java_icon(address: String, limits: Limits) -> Result<Vec<u8>, Failure> {
    let (_, response) =
        within(limits.deadline, mcprobe::tokio::get_status(java(address, limits))).await?;
    response.icon_png().ok_or(Failure::NoIcon)
}

pub async fn ping_bedrock(address: String, limits: Limits) -> Result<MCPingResponse, Failure> {
    let (latency, response) = within(
        limits.deadline,
        mcprobe::tokio::get_status(Bedrock {
            server_address: address,
            timeout: Some(limits.ping_timeout),
            tries: 5,
            wait_to_try: Some(Duration::from_millis(100)),
            ..Default::default()
        }),
    )
    .await?;
    Ok(MCPingResponse {
        latency,
        players: Players {
            online: response.players_online,
            maximum: response.players_max,
            sample: Vec::new(),
        },
        motd: response.motd_1,
        icon: None,
        version: Version {
            protocol: response.protocol_version,
            broadcast: response.version_name,
        },
        chat: ChatStatus::default(),
        forge: None,
    })
}

pub async fn query(address: String, limits: Limits) -> Result<QueryStatusResponse, Failure> {
    let (latency, response) = within(
        limits.deadline,
        mcprobe::tokio::get_status(Query {
            server_address: address,
            timeout: Some(limits.ping_timeout),
            tries: 2,
            ..Default::default()
        }),
    )
    .await?;
    Ok(QueryStatusResponse {
        latency,
        motd: response.motd,
        map: response.map_name,
        players: QueryPlayers {
            online: response.players.online,
            maximum: response.players.max,
            list: response.players.list,
        },
        software: Software {
            version: response.software.version,
            brand: response.software.brand,
            plugins: response.software.plugins,
        },
        ip: response.ip,
        port: response.port,
    })
}

pub async fn ping_legacy(address: String, limits: Limits) -> Result<MCPingResponse, Failure> {
    let (latency, response) = within(
        limits.deadline,
        mcprobe::tokio::get_status(Legacy {
            server_address: address,
            timeout: Some(limits.ping_timeout),
            tries: 1,
        }),
    )
    .await?;
    Ok(MCPingResponse {
        latency,
        players: Players {
            online: response.players_online,
            maximum: response.players_max,
            sample: Vec::new(),
        },
        motd: response.motd,
        icon: None,
        version: Version {
            protocol: response.protocol,
            broadcast: response.version_name,
        },
        chat: ChatStatus::default(),
        forge: None,
    })
}
