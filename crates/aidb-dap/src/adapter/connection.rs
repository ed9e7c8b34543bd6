//! TCP connect with retry, and socket tuning for adapter connections

use crate::{Error, Result};
#[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
use aidb_config::DEFAULT_TCP_KEEPALIVE_RETRIES;
use aidb_config::{
    SessionConfig, DEFAULT_TCP_KEEPALIVE_INTERVAL_SECS, DEFAULT_TCP_KEEPALIVE_TIME_SECS,
    LOCALHOST_IPV4,
};
use rand::Rng;
use socket2::{SockRef, TcpKeepalive};
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tracing::{debug, trace, warn};

/// Upper bound of the random delay added to each retry
const RETRY_JITTER_MS: u64 = 100;

/// Resolve an adapter host to IPv4.
///
/// `localhost` is pinned to 127.0.0.1: adapters listen on IPv4 and some
/// resolvers hand back `::1` first.
pub fn resolve_host(host: &str) -> Ipv4Addr {
    if host == "localhost" {
        return LOCALHOST_IPV4;
    }
    host.parse().unwrap_or_else(|e| {
        warn!("Invalid adapter host '{}': {}. Using 127.0.0.1", host, e);
        LOCALHOST_IPV4
    })
}

/// Connect to an adapter that may still be starting up.
///
/// Retries with exponential backoff plus jitter until `connection_timeout`
/// elapses. Gives up early after `max_connection_refused_attempts`
/// consecutive refusals, since that means nothing is listening.
pub async fn connect_with_retry(
    host: Ipv4Addr,
    port: u16,
    config: &SessionConfig,
) -> Result<TcpStream> {
    let address = format!("{}:{}", host, port);
    let started = Instant::now();
    let budget = config.connection_timeout();

    let mut backoff_ms = config.retry_interval_ms;
    let mut attempt = 0u32;
    let mut refused_in_a_row = 0u32;

    loop {
        let err = match TcpStream::connect(&address).await {
            Ok(stream) => {
                debug!(attempt, "Connected to adapter at {}", address);
                return Ok(stream);
            }
            Err(e) => e,
        };
        attempt += 1;

        if err.kind() == std::io::ErrorKind::ConnectionRefused {
            refused_in_a_row += 1;
            if refused_in_a_row >= config.max_connection_refused_attempts {
                return Err(Error::Communication(format!(
                    "Nothing listening on {} (connection refused {} times)",
                    address, refused_in_a_row
                )));
            }
        } else {
            refused_in_a_row = 0;
        }

        if started.elapsed() > budget {
            return Err(Error::Communication(format!(
                "Timed out connecting to {} after {} attempts: {}",
                address, attempt, err
            )));
        }

        let jitter_ms = rand::rng().random_range(0..RETRY_JITTER_MS);
        let wait_ms = backoff_ms.saturating_add(jitter_ms);
        trace!(attempt, wait_ms, "Connect to {} failed: {}", address, err);
        tokio::time::sleep(Duration::from_millis(wait_ms)).await;

        backoff_ms = backoff_ms.saturating_mul(2).min(config.max_retry_interval_ms);
    }
}

/// TCP_NODELAY plus keep-alive probes so idle sessions parked at a
/// breakpoint are not dropped by the OS.
pub fn configure_tcp_socket(stream: &TcpStream) {
    let socket = SockRef::from(stream);

    if let Err(e) = socket.set_nodelay(true) {
        warn!("Failed to set TCP_NODELAY: {}", e);
    }

    let keepalive = TcpKeepalive::new()
        .with_time(Duration::from_secs(DEFAULT_TCP_KEEPALIVE_TIME_SECS))
        .with_interval(Duration::from_secs(DEFAULT_TCP_KEEPALIVE_INTERVAL_SECS));
    #[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
    let keepalive = keepalive.with_retries(DEFAULT_TCP_KEEPALIVE_RETRIES);

    if let Err(e) = socket.set_tcp_keepalive(&keepalive) {
        warn!("Failed to set TCP keep-alive: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_resolve_host() {
        assert_eq!(resolve_host("localhost"), LOCALHOST_IPV4);
        assert_eq!(resolve_host("10.0.0.5"), Ipv4Addr::new(10, 0, 0, 5));
        assert_eq!(resolve_host("not-an-ip"), LOCALHOST_IPV4);
    }

    #[tokio::test]
    async fn test_connect_succeeds_when_listening() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let stream = connect_with_retry(LOCALHOST_IPV4, port, &SessionConfig::default())
            .await
            .unwrap();
        configure_tcp_socket(&stream);
        assert!(stream.nodelay().unwrap());
    }

    #[tokio::test]
    async fn test_refused_fails_fast() {
        // Bind then drop to get a port nobody listens on
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let config = SessionConfig {
            retry_interval_ms: 1,
            max_retry_interval_ms: 2,
            max_connection_refused_attempts: 3,
            connection_timeout_ms: 60_000,
            ..SessionConfig::default()
        };
        let started = Instant::now();
        let err = connect_with_retry(LOCALHOST_IPV4, port, &config)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("refused"));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
