//! TCP connect prober

use crate::banner::BannerGrabber;
use async_trait::async_trait;
use minerscope_common::{PortProber, PortResult, ProbeOptions};
use minerscope_fingerprint::guess_service;
use std::net::{Ipv4Addr, SocketAddr};
use tokio::net::TcpStream;
use tokio::time::{timeout, Instant};
use tracing::{debug, instrument};

/// Plain TCP connect prober. Needs no privileges.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpPortProber;

impl TcpPortProber {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PortProber for TcpPortProber {
    #[instrument(skip(self, options))]
    async fn probe(&self, address: Ipv4Addr, port: u16, options: &ProbeOptions) -> PortResult {
        let addr = SocketAddr::from((address, port));
        let start = Instant::now();

        let mut stream = match timeout(options.connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                debug!("{}:{} closed: {}", address, port, e);
                return PortResult::closed(port, start.elapsed());
            }
            Err(_) => {
                debug!("{}:{} connect timeout", address, port);
                return PortResult::closed(port, start.elapsed());
            }
        };
        let rtt = start.elapsed();

        let banner = if options.grab_banner {
            BannerGrabber::new(options.banner_timeout)
                .grab(&mut stream, address, port)
                .await
        } else {
            None
        };

        let service = guess_service(port, banner.as_deref());
        let mut result = PortResult::open(port, rtt).with_service(service);
        if let Some(b) = banner {
            result = result.with_banner(b);
        }
        result
    }

    fn name(&self) -> &str {
        "TCP Connect Prober"
    }
}
