//! Payloads that make quiet services talk
//!
//! Most mining endpoints say nothing until spoken to. When the passive read
//! comes back empty the banner grabber sends the payload picked here.

use std::net::Ipv4Addr;

const STRATUM_SUBSCRIBE: &[u8] = b"{\"id\": 1, \"method\": \"mining.subscribe\", \"params\": []}\n";
const CGMINER_VERSION: &[u8] = b"{\"command\":\"version\"}";
const WEB3_CLIENT_VERSION: &str =
    r#"{"jsonrpc":"2.0","method":"web3_clientVersion","params":[],"id":1}"#;
const BITCOIN_NETWORK_INFO: &str =
    r#"{"jsonrpc":"1.0","id":"minerscope","method":"getnetworkinfo","params":[]}"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeKind {
    /// Stratum `mining.subscribe` line.
    Stratum,
    /// CGMiner/BFGMiner JSON API.
    CgMiner,
    Http,
    /// Ethereum JSON-RPC over HTTP.
    EthereumRpc,
    /// bitcoind JSON-RPC `getnetworkinfo`.
    BitcoinRpc,
}

impl ProbeKind {
    /// Bytes to send to `host`. HTTP payloads carry a Host header.
    pub fn payload(&self, host: Ipv4Addr) -> Vec<u8> {
        match self {
            ProbeKind::Stratum => STRATUM_SUBSCRIBE.to_vec(),
            ProbeKind::CgMiner => CGMINER_VERSION.to_vec(),
            ProbeKind::Http => format!(
                "GET / HTTP/1.0\r\nHost: {}\r\nUser-Agent: minerscope\r\n\r\n",
                host
            )
            .into_bytes(),
            ProbeKind::EthereumRpc => json_post(host, WEB3_CLIENT_VERSION),
            ProbeKind::BitcoinRpc => json_post(host, BITCOIN_NETWORK_INFO),
        }
    }
}

fn json_post(host: Ipv4Addr, body: &str) -> Vec<u8> {
    format!(
        "POST / HTTP/1.0\r\nHost: {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
        host,
        body.len(),
        body
    )
    .into_bytes()
}

/// Pick the probe for a port. Unknown ports get the stratum subscribe, the
/// one payload that identifies a pool no matter where it listens.
pub fn probe_for_port(port: u16) -> ProbeKind {
    match port {
        4028 => ProbeKind::CgMiner,
        8545 | 8546 => ProbeKind::EthereumRpc,
        8332 | 18332 => ProbeKind::BitcoinRpc,
        80 | 443 | 3000 | 8000 | 8080 | 8081 | 8443 | 9090 => ProbeKind::Http,
        _ => ProbeKind::Stratum,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_selection() {
        assert_eq!(probe_for_port(3333), ProbeKind::Stratum);
        assert_eq!(probe_for_port(4028), ProbeKind::CgMiner);
        assert_eq!(probe_for_port(8545), ProbeKind::EthereumRpc);
        assert_eq!(probe_for_port(8332), ProbeKind::BitcoinRpc);
        assert_eq!(probe_for_port(18332), ProbeKind::BitcoinRpc);
        assert_eq!(probe_for_port(8080), ProbeKind::Http);
        assert_eq!(probe_for_port(41234), ProbeKind::Stratum);
    }

    #[test]
    fn test_rpc_payload_content_length() {
        let payload = ProbeKind::EthereumRpc.payload(Ipv4Addr::new(10, 0, 0, 5));
        let text = String::from_utf8(payload).unwrap();
        let (head, body) = text.split_once("\r\n\r\n").unwrap();
        assert!(head.contains(&format!("Content-Length: {}", body.len())));
        assert!(head.contains("Host: 10.0.0.5"));
        assert!(body.contains("web3_clientVersion"));
    }

    #[test]
    fn test_bitcoin_payload_asks_network_info() {
        let payload = ProbeKind::BitcoinRpc.payload(Ipv4Addr::new(10, 0, 0, 6));
        let text = String::from_utf8(payload).unwrap();
        let (head, body) = text.split_once("\r\n\r\n").unwrap();
        assert!(head.starts_with("POST / HTTP/1.0"));
        assert!(head.contains(&format!("Content-Length: {}", body.len())));
        assert!(body.contains("getnetworkinfo"));
        assert!(!body.contains("web3_clientVersion"));
    }

    #[test]
    fn test_stratum_payload_is_line() {
        let payload = ProbeKind::Stratum.payload(Ipv4Addr::LOCALHOST);
        assert!(payload.ends_with(b"\n"));
        assert!(String::from_utf8_lossy(&payload).contains("mining.subscribe"));
    }
}
