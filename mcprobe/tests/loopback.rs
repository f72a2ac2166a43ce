//! Drives the public API against small servers on the loopback interface.

use std::{net::SocketAddr, time::Duration};

use mcprobe::{Bedrock, ByteBuffer, Error, Java, Legacy, Query};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream, UdpSocket},
};

const STATUS: &str = r#"{"description":{"text":"Hello","extra":[{"text":" world"}]},"players":{"max":20,"online":1,"sample":[{"name":"Alex","id":"ec561538-f3fd-461d-aff5-086b22154bce"}]},"version":{"name":"1.20.1","protocol":763}}"#;

/// `None` once the client hung up.
async fn read_packet(socket: &mut TcpStream) -> Option<ByteBuffer> {
    let mut len = 0usize;
    for shift in (0..35).step_by(7) {
        let byte = socket.read_u8().await.ok()?;
        len |= usize::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            break;
        }
    }
    let mut data = vec![0; len];
    socket.read_exact(&mut data).await.ok()?;
    Some(ByteBuffer::from(data))
}

async fn send_packet(socket: &mut TcpStream, packet: &mut ByteBuffer) {
    let mut framed = ByteBuffer::new();
    framed.write_buffer(packet).unwrap();
    socket.write_all(&framed.flush()).await.unwrap();
}

/// Answers a status request and/or a ping on each connection.
async fn java_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let (mut socket, _) = listener.accept().await.unwrap();
            tokio::spawn(async move {
                let mut handshake = read_packet(&mut socket).await.unwrap();
                assert_eq!(handshake.read_varint().unwrap(), 0);
                handshake.read_varint().unwrap();
                assert_eq!(handshake.read_utf().unwrap(), "127.0.0.1");
                handshake.read_ushort().unwrap();
                assert_eq!(handshake.read_varint().unwrap(), 1);

                let mut request = read_packet(&mut socket).await.unwrap();
                if request.read_varint().unwrap() == 0 {
                    let mut response = ByteBuffer::new();
                    response.write_varint(0);
                    response.write_utf(STATUS).unwrap();
                    send_packet(&mut socket, &mut response).await;
                    let Some(next) = read_packet(&mut socket).await else {
                        return;
                    };
                    request = next;
                    request.read_varint().unwrap();
                }
                let token = request.read_long().unwrap();
                let mut pong = ByteBuffer::new();
                pong.write_varint(1);
                pong.write_long(token);
                send_packet(&mut socket, &mut pong).await;
            });
        }
    });
    addr
}

#[tokio::test]
async fn java_status_and_ping() {
    let addr = java_server().await;
    let java = Java {
        server_address: addr.to_string(),
        timeout: Some(Duration::from_secs(2)),
        tries: 1,
        ..Default::default()
    };

    let (latency, response) = mcprobe::tokio::get_status(java.clone()).await.unwrap();
    assert!(latency >= 0.0);
    assert_eq!(response.description.to_plain(), "Hello world");
    assert_eq!(response.players.online, 1);
    assert_eq!(response.version.protocol, 763);

    assert!(mcprobe::tokio::test_ping(&java).await.unwrap() >= 0.0);
}

#[tokio::test]
async fn blocking_java_status() {
    let addr = java_server().await;
    let java = Java {
        server_address: addr.to_string(),
        timeout: Some(Duration::from_secs(2)),
        ..Default::default()
    };
    let (_, response) = tokio::task::spawn_blocking(move || mcprobe::get_status(java))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(response.players.sample.unwrap()[0].name, "Alex");
}

#[tokio::test]
async fn bedrock_pong() {
    let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(async move {
        let mut ping = [0; 64];
        let (len, peer) = server.recv_from(&mut ping).await.unwrap();
        assert_eq!(len, 33);
        let payload = b"MCPE;Loopback;594;1.20.1;2;10;1;world;Creative;1;19132;19133;";
        let mut pong = ByteBuffer::new();
        pong.write_u8(0x1c);
        pong.write(&ping[1..9]);
        pong.write_ulong(7);
        pong.write(&ping[9..25]);
        pong.write_ushort(u16::try_from(payload.len()).unwrap());
        pong.write(payload);
        server.send_to(&pong.flush(), peer).await.unwrap();
    });

    let (_, response) = mcprobe::tokio::get_status(Bedrock {
        server_address: addr.to_string(),
        timeout: Some(Duration::from_secs(2)),
        tries: 1,
        ..Default::default()
    })
    .await
    .unwrap();
    assert_eq!(response.motd_1, "Loopback");
    assert_eq!(response.players_online, 2);
    assert_eq!(response.game_mode.as_deref(), Some("Creative"));
}

#[tokio::test]
async fn query_full_stat() {
    let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(async move {
        let mut request = [0; 64];
        let (len, peer) = server.recv_from(&mut request).await.unwrap();
        assert_eq!(&request[..3], b"\xFE\xFD\x09");
        let session = request[3..len].to_vec();
        let mut reply = vec![0x09];
        reply.extend(&session);
        reply.extend(b"9513307\0");
        server.send_to(&reply, peer).await.unwrap();

        let (len, peer) = server.recv_from(&mut request).await.unwrap();
        assert_eq!(len, 15);
        assert_eq!(&request[3..7], session.as_slice());
        assert_eq!(&request[7..11], 9_513_307_i32.to_be_bytes());
        let mut reply = vec![0x00];
        reply.extend(&session);
        reply.extend(b"splitnum\0\x80\0");
        for (key, value) in [
            ("hostname", "Loopback"),
            ("gametype", "SMP"),
            ("game_id", "MINECRAFT"),
            ("version", "1.20.1"),
            ("plugins", "Paper on 1.20.1: LuckPerms 5.4"),
            ("map", "world"),
            ("numplayers", "2"),
            ("maxplayers", "20"),
            ("hostport", "25565"),
            ("hostip", "127.0.0.1"),
        ] {
            reply.extend(key.as_bytes());
            reply.push(0);
            reply.extend(value.as_bytes());
            reply.push(0);
        }
        reply.extend(b"\0\x01player_\0\0Alex\0Steve\0\0");
        server.send_to(&reply, peer).await.unwrap();
    });

    let (_, response) = mcprobe::tokio::get_status(Query {
        server_address: addr.to_string(),
        timeout: Some(Duration::from_secs(2)),
        tries: 1,
        ..Default::default()
    })
    .await
    .unwrap();
    assert_eq!(response.motd, "Loopback");
    assert_eq!(response.players.list, ["Alex", "Steve"]);
    assert_eq!(response.software.brand, "Paper on 1.20.1");
    assert_eq!(response.software.plugins, ["LuckPerms 5.4"]);
}

#[tokio::test]
async fn legacy_kick() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = [0; 3];
        socket.read_exact(&mut request).await.unwrap();
        assert_eq!(request, [0xFE, 0x01, 0xFA]);
        let reason: Vec<u16> = "§1\0127\01.6.4\0Old server\00\020".encode_utf16().collect();
        let mut kick = ByteBuffer::new();
        kick.write_u8(0xFF);
        kick.write_ushort(u16::try_from(reason.len()).unwrap());
        reason.into_iter().for_each(|unit| kick.write_ushort(unit));
        socket.write_all(&kick.flush()).await.unwrap();
    });

    let (_, response) = mcprobe::tokio::get_status(Legacy {
        server_address: addr.to_string(),
        timeout: Some(Duration::from_secs(2)),
        tries: 1,
    })
    .await
    .unwrap();
    assert_eq!(response.version_name, "1.6.4");
    assert_eq!(response.motd, "Old server");
}

#[tokio::test]
async fn refused_connection_is_retried_then_reported() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let result = mcprobe::tokio::get_status(Java {
        server_address: addr.to_string(),
        timeout: Some(Duration::from_millis(500)),
        tries: 2,
        ..Default::default()
    })
    .await;
    assert!(matches!(result, Err(Error::IoError(_) | Error::Timeout)));
}
