//! Port-list parsing ("80,443,3333-3335")

use minerscope_common::{MinerScopeError, MinerScopeResult};

/// Parse a port string into a sorted, deduplicated list.
pub fn parse_ports(ports_str: &str) -> MinerScopeResult<Vec<u16>> {
    let mut ports = Vec::new();

    for part in ports_str.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }

        if part.contains('-') {
            let range: Vec<&str> = part.split('-').collect();
            if range.len() != 2 {
                return Err(MinerScopeError::malformed_port(part, "range must be START-END"));
            }

            let start = parse_port(range[0].trim(), part)?;
            let end = parse_port(range[1].trim(), part)?;
            if start > end {
                return Err(MinerScopeError::malformed_port(part, "range start is after end"));
            }

            ports.extend(start..=end);
        } else {
            ports.push(parse_port(part, part)?);
        }
    }

    if ports.is_empty() {
        return Err(MinerScopeError::malformed_port(ports_str, "no ports specified"));
    }

    ports.sort_unstable();
    ports.dedup();
    Ok(ports)
}

fn parse_port(text: &str, token: &str) -> MinerScopeResult<u16> {
    match text.parse::<u16>() {
        Ok(0) => Err(MinerScopeError::malformed_port(token, "port 0 is not scannable")),
        Ok(port) => Ok(port),
        Err(_) => Err(MinerScopeError::malformed_port(
            token,
            format!("'{}' is not a port number", text),
        )),
    }
}
