//! Async versions of the clients, running on tokio.
//!
//! Names are resolved with a shared hickory resolver, which also follows the
//! `_minecraft._tcp` SRV records of Java addresses.

pub mod address;
mod bedrock;
mod java;
mod legacy;
mod query;
pub mod transport;

use std::{future::Future, sync::OnceLock, time::Duration};

use hickory_resolver::{
    TokioResolver,
    config::{ResolverConfig, ResolverOpts},
    name_server::TokioConnectionProvider,
};

use crate::Error;

pub use java::test_ping;
pub use transport::{AsyncTransport, TokioTcpTransport, TokioUdpTransport};

/// A server configuration that knows how to ask for a status.
pub trait AsyncPingable {
    /// What a successful exchange yields.
    type Response;

    /// Ping the entity, gathering the latency (in milliseconds) and response.
    fn ping(self)
    -> impl std::future::Future<Output = Result<(f64, Self::Response), Error>> + Send;
}

/// Runs the exchange described by an [`AsyncPingable`] configuration.
///
/// Returns `(latency_ms, response)` where response is a response type of the `AsyncPingable` configuration.
///
/// # Examples
///
/// Ping a Java Server with the default timeout:
///
/// ```no_run
/// # async {
/// let (latency, response) = mcprobe::tokio::get_status(mcprobe::Java {
///     server_address: "mc.hypixel.net".into(),
///     ..Default::default()
/// }).await?;
/// # Ok::<(), mcprobe::Error>(())
/// # };
/// ```
///
/// Ping a Bedrock server with a one second timeout, trying 3 times:
///
/// ```no_run
/// # async {
/// use std::time::Duration;
///
/// let (latency, response) = mcprobe::tokio::get_status(mcprobe::Bedrock {
///     server_address: "play.nethergames.org".into(),
///     timeout: Some(Duration::from_secs(1)),
///     tries: 3,
///     ..Default::default()
/// }).await?;
/// # Ok::<(), mcprobe::Error>(())
/// # };
/// ```
///
/// # Errors
/// If the server status cannot be received
pub async fn get_status<P: AsyncPingable + Send>(pingable: P) -> Result<(f64, P::Response), Error> {
    pingable.ping().await
}

/// Runs `op` up to `tries` times, like [`crate::retry::retry`], sleeping
/// `wait` on the tokio timer between attempts.
///
/// # Errors
/// The error of the final attempt.
pub async fn retry<T, F, Fut>(tries: usize, wait: Option<Duration>, mut op: F) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    let tries = tries.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(error) if attempt < tries => {
                warn!(attempt, tries, %error, "attempt failed, retrying");
                if let Some(wait) = wait {
                    ::tokio::time::sleep(wait).await;
                }
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}

fn new_resolver() -> TokioResolver {
    let mut opts = ResolverOpts::default();
    opts.cache_size = 64;
    opts.attempts = 3;
    TokioResolver::builder_with_config(
        ResolverConfig::cloudflare(),
        TokioConnectionProvider::default(),
    )
    .with_options(opts)
    .build()
}

/// The process-wide resolver.
pub fn resolver() -> &'static TokioResolver {
    static RESOLVER: OnceLock<TokioResolver> = OnceLock::new();
    RESOLVER.get_or_init(new_resolver)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test]
    async fn retries_until_success() {
        let calls = &AtomicUsize::new(0);
        let result = retry(3, Some(Duration::from_millis(1)), || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(Error::Validation("players missing".to_owned()))
            } else {
                Ok("done")
            }
        })
        .await;
        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn returns_last_error() {
        let calls = &AtomicUsize::new(0);
        let result: Result<(), Error> = retry(0, None, || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::Timeout)
        })
        .await;
        assert!(matches!(result, Err(Error::Timeout)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
