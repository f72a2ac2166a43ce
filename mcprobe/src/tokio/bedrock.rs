use std::time::Instant;

use crate::{
    Bedrock, BedrockClient, BedrockResponse, Error, bedrock::DEFAULT_PORT,
    transport::MAX_DATAGRAM_SIZE,
};

use super::{
    AsyncPingable, address::resolve, retry,
    transport::{AsyncTransport, TokioUdpTransport},
};

pub(crate) async fn read_status<T: AsyncTransport>(
    client: BedrockClient,
    conn: &mut T,
) -> Result<BedrockResponse, Error> {
    let start = Instant::now();
    let datagram = match conn.write(&client.request()).await {
        Ok(()) => conn.read(MAX_DATAGRAM_SIZE).await,
        Err(e) => Err(e),
    };
    client.finish(datagram, start.elapsed())
}

impl AsyncPingable for Bedrock {
    type Response = BedrockResponse;

    async fn ping(self) -> Result<(f64, Self::Response), Error> {
        let address = crate::Address::parse(&self.server_address, DEFAULT_PORT)?;
        let socket = resolve(&address).await?;
        let (config, address) = (&self, &address);
        retry(self.tries, self.wait_to_try, || async move {
            let mut conn =
                TokioUdpTransport::connect_from(socket, &config.socket_addresses, config.timeout())
                    .await?;
            let response = read_status(BedrockClient, &mut conn).await?;
            debug!(%address, latency = response.latency, "bedrock pong received");
            Ok((response.latency, response))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BedrockEdition, ByteBuffer, bedrock::OFFLINE_MESSAGE_DATA_ID};

    #[tokio::test]
    async fn reads_pong() {
        let payload = b"MCPE;Dedicated Server;527;1.19.1;0;10;13253860892328930865;Bedrock level;Survival;1;19132;19133;";
        let mut conn = ByteBuffer::new();
        conn.write_u8(0x1c);
        conn.write_ulong(1);
        conn.write_ulong(2);
        conn.write(OFFLINE_MESSAGE_DATA_ID);
        conn.write_ushort(u16::try_from(payload.len()).unwrap());
        conn.write(payload);
        let mut conn = ByteBuffer::from(conn.flush());

        let response = read_status(BedrockClient, &mut conn).await.unwrap();
        assert_eq!(conn.flush().len(), 33);
        assert_eq!(response.edition, BedrockEdition::PocketEdition);
        assert_eq!(response.protocol_version, 527);
        assert_eq!(response.motd_2.as_deref(), Some("Bedrock level"));
    }

    #[tokio::test]
    async fn short_pong() {
        let mut conn = ByteBuffer::from(vec![0x1c; 34]);
        assert!(matches!(
            read_status(BedrockClient, &mut conn).await,
            Err(Error::Protocol(_))
        ));
    }
}
