//! Finds a host on the local /24 by probing `get_host_info`.

use futures::stream::{self, StreamExt};
use std::net::{Ipv4Addr, UdpSocket};
use std::pin::pin;
use std::time::Duration;

use tbtrack_core::sync::HostInfo;

use crate::client::HostClient;

/// Errors that can occur during a scan.
#[derive(Debug)]
pub enum DiscoveryError {
    /// Base is not three dotted octets
    InvalidBase(String),
    /// Local address could not be determined
    NoLocalAddress(String),
    /// No candidate answered in time
    NoHostFound { base: String },
}

impl std::fmt::Display for DiscoveryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiscoveryError::InvalidBase(base) => write!(
                f,
                "Invalid network base '{}'. Expected three octets, e.g. 192.168.1",
                base
            ),
            DiscoveryError::NoLocalAddress(e) => {
                write!(f, "Could not determine local network: {}", e)
            }
            DiscoveryError::NoHostFound { base } => {
                write!(f, "No host answered on {}.1-254", base)
            }
        }
    }
}

impl std::error::Error for DiscoveryError {}

/// How to scan.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub port: u16,
    pub concurrency: usize,
    pub probe_timeout: Duration,
    pub device: String,
}

/// A host that answered a probe.
#[derive(Debug, Clone)]
pub struct FoundHost {
    pub url: String,
    pub info: HostInfo,
}

/// Validates `base` ("192.168.1") and returns it without a trailing dot.
pub fn parse_base(base: &str) -> Result<String, DiscoveryError> {
    let trimmed = base.trim().trim_end_matches('.');
    let octets: Vec<&str> = trimmed.split('.').collect();
    if octets.len() != 3 || octets.iter().any(|o| o.parse::<u8>().is_err()) {
        return Err(DiscoveryError::InvalidBase(base.to_string()));
    }
    Ok(trimmed.to_string())
}

/// Network base of the interface used for outbound traffic.
///
/// Connecting a UDP socket sends nothing; it only selects a route.
pub fn local_base() -> Result<String, DiscoveryError> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
        .map_err(|e| DiscoveryError::NoLocalAddress(e.to_string()))?;
    socket
        .connect((Ipv4Addr::new(8, 8, 8, 8), 80))
        .map_err(|e| DiscoveryError::NoLocalAddress(e.to_string()))?;
    let addr = socket
        .local_addr()
        .map_err(|e| DiscoveryError::NoLocalAddress(e.to_string()))?;

    match addr.ip() {
        std::net::IpAddr::V4(ip) => {
            let [a, b, c, _] = ip.octets();
            Ok(format!("{}.{}.{}", a, b, c))
        }
        other => Err(DiscoveryError::NoLocalAddress(format!(
            "{} is not an IPv4 address",
            other
        ))),
    }
}

/// Candidate URLs `base.1 ..= base.254`, in order.
pub fn candidates(base: &str, port: u16) -> Vec<String> {
    (1..=254u8)
        .map(|host| format!("http://{}.{}:{}", base, host, port))
        .collect()
}

async fn probe(url: String, options: &ScanOptions) -> Option<FoundHost> {
    let client = HostClient::new(&url, options.device.clone(), options.probe_timeout).ok()?;
    match tokio::time::timeout(options.probe_timeout, client.host_info()).await {
        Ok(Ok(info)) => Some(FoundHost { url, info }),
        Ok(Err(e)) => {
            tracing::trace!("probe {}: {}", url, e);
            None
        }
        Err(_) => None,
    }
}

/// Probes every candidate of `base` and returns the first host to answer.
pub async fn scan(base: &str, options: &ScanOptions) -> Result<FoundHost, DiscoveryError> {
    let base = parse_base(base)?;
    tracing::info!(
        "scanning {}.1-254:{} ({} at a time)",
        base,
        options.port,
        options.concurrency
    );

    match first_answer(candidates(&base, options.port), options).await {
        Some(found) => {
            tracing::info!("found host {} at {}", found.info.hostname, found.url);
            Ok(found)
        }
        None => Err(DiscoveryError::NoHostFound { base }),
    }
}

/// At most `options.concurrency` probes are in flight. Outstanding probes are
/// dropped as soon as one succeeds.
async fn first_answer(urls: Vec<String>, options: &ScanOptions) -> Option<FoundHost> {
    let hits = stream::iter(urls)
        .map(|url| probe(url, options))
        .buffer_unordered(options.concurrency.max(1))
        .filter_map(|found| async move { found });
    let mut hits = pin!(hits);
    hits.next().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Instant;
    use tokio::net::TcpListener;

    use crate::db::test_pool;
    use crate::server::{router, AppState};

    /// Accepts connections and never answers, counting them.
    async fn silent_listener() -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let accepted = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&accepted);
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                held.push(stream);
            }
        });
        (url, accepted)
    }

    #[test]
    fn test_parse_base() {
        assert_eq!(parse_base("192.168.1").unwrap(), "192.168.1");
        assert_eq!(parse_base("10.0.0.").unwrap(), "10.0.0");
        assert!(parse_base("192.168").is_err());
        assert!(parse_base("192.168.300").is_err());
        assert!(parse_base("a.b.c").is_err());
    }

    #[test]
    fn test_candidates() {
        let urls = candidates("192.168.1", 5000);
        assert_eq!(urls.len(), 254);
        assert_eq!(urls[0], "http://192.168.1.1:5000");
        assert_eq!(urls[253], "http://192.168.1.254:5000");
    }

    #[tokio::test]
    async fn test_scan_rejects_bad_base() {
        let options = ScanOptions {
            port: 5000,
            concurrency: 4,
            probe_timeout: Duration::from_millis(10),
            device: "phone".to_string(),
        };
        let err = scan("nope", &options).await.unwrap_err();
        assert!(matches!(err, DiscoveryError::InvalidBase(_)));
    }

    #[tokio::test]
    async fn test_first_answer_stops_at_live_host() {
        let (_dir, pool) = test_pool().await;
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let live = format!("http://{}", listener.local_addr().unwrap());
        let app = router(AppState::new(pool, "clinic-host"));
        tokio::spawn(async move { axum::serve(listener, app).await });

        let (silent, accepted) = silent_listener().await;
        let mut urls = vec![silent.clone(); 40];
        urls[2] = live.clone();

        let options = ScanOptions {
            port: 5000,
            concurrency: 4,
            probe_timeout: Duration::from_secs(5),
            device: "phone".to_string(),
        };
        let started = Instant::now();
        let found = first_answer(urls, &options).await.unwrap();

        assert_eq!(found.url, live);
        assert_eq!(found.info.hostname, "clinic-host");
        assert!(started.elapsed() < Duration::from_secs(2));

        // Only the probes sharing the first window ever reached the silent host.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(accepted.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_first_answer_none_when_nobody_answers() {
        let (silent, accepted) = silent_listener().await;
        let options = ScanOptions {
            port: 5000,
            concurrency: 2,
            probe_timeout: Duration::from_millis(100),
            device: "phone".to_string(),
        };

        assert!(first_answer(vec![silent; 4], &options).await.is_none());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(accepted.load(Ordering::SeqCst), 4);
    }
}
