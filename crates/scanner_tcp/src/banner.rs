//! Banner grabbing functionality

use minerscope_common::types::{decode_banner, MAX_BANNER_BYTES};
use minerscope_fingerprint::probe_for_port;
use std::net::Ipv4Addr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{timeout, Instant};
use tracing::{debug, instrument};

/// Reads whatever a freshly connected service has to say, poking it with a
/// port-specific payload when it stays quiet.
#[derive(Debug, Clone, Copy)]
pub struct BannerGrabber {
    budget: Duration,
}

impl BannerGrabber {
    pub fn new(budget: Duration) -> Self {
        Self { budget }
    }

    /// Grab a banner from a connected stream.
    ///
    /// Half the budget goes to a passive read, the rest to the active probe.
    /// Running out of time yields `None`, never an error.
    #[instrument(skip(self, stream))]
    pub async fn grab<S>(&self, stream: &mut S, address: Ipv4Addr, port: u16) -> Option<String>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let deadline = Instant::now() + self.budget;
        let mut buf = [0u8; MAX_BANNER_BYTES];

        match timeout(self.budget / 2, stream.read(&mut buf)).await {
            Ok(Ok(n)) if n > 0 => {
                debug!("Passive banner grab: {} bytes", n);
                return decode_banner(&buf[..n]);
            }
            Ok(Ok(_)) => {
                // Peer closed without a word; nothing left to probe.
                return None;
            }
            _ => debug!("No passive banner, trying active probe"),
        }

        let payload = probe_for_port(port).payload(address);
        let remaining = deadline.saturating_duration_since(Instant::now());
        if !matches!(timeout(remaining, stream.write_all(&payload)).await, Ok(Ok(()))) {
            debug!("Failed to send probe payload");
            return None;
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        match timeout(remaining, stream.read(&mut buf)).await {
            Ok(Ok(n)) if n > 0 => {
                debug!("Active banner grab: {} bytes", n);
                decode_banner(&buf[..n])
            }
            Ok(Ok(_)) => None,
            Ok(Err(e)) => {
                debug!("Read error: {}", e);
                None
            }
            Err(_) => {
                debug!("Banner timeout");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::{TcpListener, TcpStream};

    async fn listener() -> (TcpListener, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    #[tokio::test]
    async fn test_passive_banner() {
        let (listener, port) = listener().await;
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            sock.write_all(b"220 stratum proxy ready\r\n").await.unwrap();
            tokio::time::sleep(Duration::from_millis(200)).await;
        });

        let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let grabber = BannerGrabber::new(Duration::from_millis(1000));
        let banner = grabber.grab(&mut stream, Ipv4Addr::LOCALHOST, port).await;
        assert_eq!(banner.as_deref(), Some("220 stratum proxy ready"));
    }

    #[tokio::test]
    async fn test_active_probe_response() {
        let (listener, port) = listener().await;
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 256];
            let n = sock.read(&mut buf).await.unwrap();
            // Echo back the method it asked for, the way a pool would answer.
            if String::from_utf8_lossy(&buf[..n]).contains("mining.subscribe") {
                sock.write_all(br#"{"id":1,"result":[["mining.notify","ae68"]],"error":null}"#)
                    .await
                    .unwrap();
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        });

        let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let grabber = BannerGrabber::new(Duration::from_millis(1000));
        let banner = grabber.grab(&mut stream, Ipv4Addr::LOCALHOST, port).await.unwrap();
        assert!(banner.contains("mining.notify"));
    }

    #[tokio::test]
    async fn test_silent_service_yields_none() {
        let (listener, port) = listener().await;
        tokio::spawn(async move {
            let (_sock, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(2)).await;
        });

        let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let grabber = BannerGrabber::new(Duration::from_millis(200));
        let started = std::time::Instant::now();
        let banner = grabber.grab(&mut stream, Ipv4Addr::LOCALHOST, port).await;
        assert!(banner.is_none());
        assert!(started.elapsed() < Duration::from_millis(1000));
    }
}
