use std::time::Instant;

use crate::{
    ByteBuffer, Error, Java, JavaClient, JavaResponse,
    java::{DEFAULT_PORT, Envelope},
};

use super::{
    AsyncPingable, address::resolve_java, retry, transport::AsyncTransport,
    transport::TokioTcpTransport,
};

pub(crate) async fn handshake<T: AsyncTransport>(
    client: &mut JavaClient,
    conn: &mut T,
) -> Result<(), Error> {
    let packet = client.begin_handshake()?;
    conn.write(&packet).await
}

pub(crate) async fn read_status<T: AsyncTransport>(
    client: &mut JavaClient,
    conn: &mut T,
) -> Result<JavaResponse, Error> {
    let request = client.begin_status()?;
    let start = Instant::now();
    let response = match conn.write(&request).await {
        Ok(()) => read_envelope(conn).await,
        Err(e) => Err(e),
    };
    client.finish_status(response, start.elapsed())
}

pub(crate) async fn send_ping<T: AsyncTransport>(
    client: &mut JavaClient,
    conn: &mut T,
) -> Result<f64, Error> {
    let request = client.begin_ping()?;
    let start = Instant::now();
    let response = match conn.write(&request).await {
        Ok(()) => read_envelope(conn).await,
        Err(e) => Err(e),
    };
    client.finish_ping(response, start.elapsed())
}

async fn read_envelope<T: AsyncTransport>(conn: &mut T) -> Result<ByteBuffer, Error> {
    let mut envelope = Envelope::new();
    let len = loop {
        if let Some(len) = envelope.push(conn.read(1).await?)? {
            break len;
        }
    };
    Envelope::body(conn.read(len).await?, len)
}

impl AsyncPingable for Java {
    type Response = JavaResponse;

    async fn ping(self) -> Result<(f64, Self::Response), Error> {
        let (address, socket) = resolve_java(&self.server_address, DEFAULT_PORT).await?;
        let (config, address) = (&self, &address);
        retry(self.tries, None, || async move {
            let mut conn = TokioTcpTransport::connect(socket, config.timeout()).await?;
            let mut client =
                JavaClient::new(address.clone(), config.protocol_version, config.ping_token);
            handshake(&mut client, &mut conn).await?;
            let response = read_status(&mut client, &mut conn).await?;
            debug!(%address, latency = response.latency, "java status received");
            Ok((response.latency, response))
        })
        .await
    }
}

/// Measures the latency of a [`Java`] server with a ping packet only.
///
/// # Errors
/// If every attempt failed.
pub async fn test_ping(java: &Java) -> Result<f64, Error> {
    let (address, socket) = resolve_java(&java.server_address, DEFAULT_PORT).await?;
    let address = &address;
    retry(java.tries, None, || async move {
        let mut conn = TokioTcpTransport::connect(socket, java.timeout()).await?;
        let mut client = JavaClient::new(address.clone(), java.protocol_version, java.ping_token);
        handshake(&mut client, &mut conn).await?;
        send_ping(&mut client, &mut conn).await
    })
    .await
}
