//! CLI surface and peer address book.
//!
//! Parsing style follows the derive-`clap` convention used across the wider
//! retrieval pack (e.g. `tos-network-tos`'s wallet `config.rs`), rather than
//! the teacher's own `structopt`-based dev-dependency (the teacher only uses
//! `structopt` in example binaries, not its library surface).

use std::collections::BTreeMap;
use std::net::SocketAddr;

use clap::Parser;

use crate::wire::PeerId;

#[derive(Debug, Clone, Parser)]
#[command(about = "Distributed printer peer: Ricart-Agrawala over Lamport clocks")]
pub struct PeerArgs {
    /// Unique identity of this peer (> 0).
    #[arg(long)]
    pub id: PeerId,

    /// Local bind port for this peer's RPC server.
    #[arg(long)]
    pub port: u16,

    /// Other peers, as "id:host:port,id:host:port,...".
    #[arg(long)]
    pub clients: String,

    /// Printer service address.
    #[arg(long, default_value = "127.0.0.1:50051")]
    pub printer: String,

    /// Minimum delay in milliseconds between automatic print requests.
    #[arg(long, default_value_t = 5_000)]
    pub request_interval_ms_min: u64,

    /// Maximum delay in milliseconds between automatic print requests.
    #[arg(long, default_value_t = 10_000)]
    pub request_interval_ms_max: u64,

    /// Disable the automatic request generator (useful for scripted runs).
    #[arg(long)]
    pub no_generator: bool,
}

#[derive(Debug, Clone, Parser)]
#[command(about = "Distributed printer service: a dumb, stateless shared resource")]
pub struct PrinterArgs {
    /// Local bind port for the printer's RPC server.
    #[arg(long, default_value_t = 50051)]
    pub port: u16,

    /// Minimum simulated print delay in milliseconds.
    #[arg(long, default_value_t = 2_000)]
    pub print_delay_ms_min: u64,

    /// Maximum simulated print delay in milliseconds.
    #[arg(long, default_value_t = 3_000)]
    pub print_delay_ms_max: u64,
}

/// `id -> address` map of every *other* peer, built from `--clients`.
#[derive(Debug, Clone, Default)]
pub struct PeerAddressBook {
    addresses: BTreeMap<PeerId, SocketAddr>,
}

impl PeerAddressBook {
    /// Parses `"id1:host1:port1,id2:host2:port2,..."`, rejecting duplicate
    /// ids, an id equal to `local_id`, or any unparsable triple/address —
    /// all fatal configuration errors.
    pub fn parse(raw: &str, local_id: PeerId) -> anyhow::Result<Self> {
        let mut addresses = BTreeMap::new();
        for entry in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let mut parts = entry.splitn(3, ':');
            let id = parts
                .next()
                .ok_or_else(|| anyhow::anyhow!("missing id in peer entry {entry:?}"))?
                .parse::<PeerId>()
                .map_err(|e| anyhow::anyhow!("invalid peer id in {entry:?}: {e}"))?;
            let host = parts
                .next()
                .ok_or_else(|| anyhow::anyhow!("missing host in peer entry {entry:?}"))?;
            let port = parts
                .next()
                .ok_or_else(|| anyhow::anyhow!("missing port in peer entry {entry:?}"))?;

            anyhow::ensure!(id != local_id, "peer list contains this peer's own id {id}");

            let addr: SocketAddr = format!("{host}:{port}")
                .parse()
                .map_err(|e| anyhow::anyhow!("invalid address in {entry:?}: {e}"))?;

            anyhow::ensure!(
                addresses.insert(id, addr).is_none(),
                "duplicate peer id {id} in peer list"
            );
        }
        Ok(Self { addresses })
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (PeerId, SocketAddr)> + '_ {
        self.addresses.iter().map(|(&id, &addr)| (id, addr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_well_formed_list() {
        let book = PeerAddressBook::parse("2:127.0.0.1:6002,3:127.0.0.1:6003", 1).unwrap();
        assert_eq!(book.len(), 2);
        let addrs: Vec<_> = book.iter().collect();
        assert_eq!(addrs[0].0, 2);
        assert_eq!(addrs[1].0, 3);
    }

    #[test]
    fn empty_list_is_allowed() {
        let book = PeerAddressBook::parse("", 1).unwrap();
        assert!(book.is_empty());
    }

    #[test]
    fn rejects_duplicate_ids() {
        assert!(PeerAddressBook::parse("2:127.0.0.1:6002,2:127.0.0.1:6003", 1).is_err());
    }

    #[test]
    fn rejects_own_id_in_the_list() {
        assert!(PeerAddressBook::parse("1:127.0.0.1:6001", 1).is_err());
    }

    #[test]
    fn rejects_malformed_entries() {
        assert!(PeerAddressBook::parse("not-an-entry", 1).is_err());
        assert!(PeerAddressBook::parse("2:127.0.0.1:not-a-port", 1).is_err());
    }
}
