//! Miner signatures and the open-port heuristic

use minerscope_common::MinerType;

/// Confidence reported when only the port heuristic fired.
pub const HEURISTIC_CONFIDENCE: f64 = 0.4;

// Checked in order; the first family with a hit wins. Stratum comes before
// ethereum because "eth_submitLogin" would otherwise match "eth_".
const BANNER_SIGNATURES: &[(MinerType, &[&str])] = &[
    (
        MinerType::Stratum,
        &[
            "stratum",
            "mining.subscribe",
            "mining.authorize",
            "mining.notify",
            "eth_submitlogin",
            "eth_getwork",
        ],
    ),
    (
        MinerType::Bitcoin,
        &["bitcoin", "satoshi", "getwork", "getblocktemplate"],
    ),
    (
        MinerType::Ethereum,
        &["eth_", "net_version", "web3_clientversion", "geth", "parity"],
    ),
    (
        MinerType::Monero,
        &["monero", "cryptonight", "xmr-", "monerod"],
    ),
];

const STRATUM_PORTS: &[u16] = &[3333, 4444, 4028, 5555, 7777, 8888, 9999, 14433, 14444];
const BITCOIN_PORTS: &[u16] = &[8332, 8333, 18332, 18333];
const ETHEREUM_PORTS: &[u16] = &[8545, 8546, 30303, 30304];

/// Classify a banner by known miner signatures, case-insensitively.
pub fn detect_miner_from_banner(banner: &str) -> Option<MinerType> {
    let lower = banner.to_lowercase();
    BANNER_SIGNATURES
        .iter()
        .find(|(_, patterns)| patterns.iter().any(|p| lower.contains(p)))
        .map(|(miner_type, _)| *miner_type)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeuristicMatch {
    pub miner_type: MinerType,
    pub confidence: f64,
}

/// Flag a host from its open ports alone.
pub fn detect_miner_heuristic(open_ports: &[u16]) -> Option<HeuristicMatch> {
    let hit = |family: &[u16]| open_ports.iter().any(|p| family.contains(p));

    let miner_type = if hit(STRATUM_PORTS) {
        MinerType::Stratum
    } else if hit(BITCOIN_PORTS) {
        MinerType::Bitcoin
    } else if hit(ETHEREUM_PORTS) {
        MinerType::Ethereum
    } else {
        return None;
    };

    Some(HeuristicMatch {
        miner_type,
        confidence: HEURISTIC_CONFIDENCE,
    })
}
