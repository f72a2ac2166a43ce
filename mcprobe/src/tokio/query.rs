use std::time::Instant;

use crate::{Error, Query, QueryClient, QueryResponse, elapsed_ms, transport::MAX_DATAGRAM_SIZE};

use super::{
    AsyncPingable, address::resolve, retry,
    transport::{AsyncTransport, TokioUdpTransport},
};

pub(crate) async fn handshake<T: AsyncTransport>(
    client: &mut QueryClient,
    conn: &mut T,
) -> Result<(), Error> {
    conn.write(&client.handshake_packet()).await?;
    client.finish_handshake(conn.read(MAX_DATAGRAM_SIZE).await?)?;
    Ok(())
}

pub(crate) async fn read_query<T: AsyncTransport>(
    client: &QueryClient,
    conn: &mut T,
) -> Result<QueryResponse, Error> {
    conn.write(&client.stat_packet()?).await?;
    QueryClient::finish_stat(conn.read(MAX_DATAGRAM_SIZE).await?)
}

impl AsyncPingable for Query {
    type Response = QueryResponse;

    async fn ping(self) -> Result<(f64, Self::Response), Error> {
        let address = self.address()?;
        let socket = resolve(&address).await?;
        let (config, address) = (&self, &address);
        retry(self.tries, None, || async move {
            let mut conn = TokioUdpTransport::connect(socket, config.timeout()).await?;
            let mut client = QueryClient::new(config.session_id);
            handshake(&mut client, &mut conn).await?;
            let start = Instant::now();
            let response = read_query(&client, &mut conn).await?;
            let latency = elapsed_ms(start.elapsed());
            debug!(%address, latency, players = response.players.online, "query stat received");
            Ok((latency, response))
        })
        .await
    }
}
