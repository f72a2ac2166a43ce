use std::time::Instant;

use crate::{
    ByteBuffer, Error, Legacy, LegacyClient, LegacyResponse, java::DEFAULT_PORT, transport::exact,
};

use super::{
    AsyncPingable, address::resolve, retry,
    transport::{AsyncTransport, TokioTcpTransport},
};

pub(crate) async fn read_status<T: AsyncTransport>(
    client: LegacyClient,
    conn: &mut T,
) -> Result<LegacyResponse, Error> {
    let start = Instant::now();
    conn.write(&client.request()).await?;
    client.check_id(exact(conn.read(1).await?, 1)?[0])?;
    let len = ByteBuffer::from(exact(conn.read(2).await?, 2)?).read_ushort()?;
    let len = usize::from(len) * 2;
    let data = exact(conn.read(len).await?, len)?;
    client.finish(&data, start.elapsed())
}

impl AsyncPingable for Legacy {
    type Response = LegacyResponse;

    async fn ping(self) -> Result<(f64, Self::Response), Error> {
        let address = crate::Address::parse(&self.server_address, DEFAULT_PORT)?;
        let socket = resolve(&address).await?;
        let (config, address) = (&self, &address);
        retry(self.tries, None, || async move {
            let mut conn = TokioTcpTransport::connect(socket, config.timeout()).await?;
            let response = read_status(LegacyClient, &mut conn).await?;
            debug!(%address, latency = response.latency, "legacy status received");
            Ok((response.latency, response))
        })
        .await
    }
}
