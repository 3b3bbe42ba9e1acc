// 🕸️ Graph Collaborators - Transaction Graph Accessor + Counterparty Tags
//
// The tracer only sees these two seams. Explorer clients (Etherscan,
// TronGrid, ...) live outside this crate and implement GraphAccessor.

use crate::models::{normalize_address, Chain, CounterpartyTag, Transaction};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::Path;

// ============================================================================
// TRAITS
// ============================================================================

/// GraphAccessor - incident transactions for one address
///
/// May return an empty list, may fail per call, no ordering guarantee.
#[async_trait]
pub trait GraphAccessor: Send + Sync {
    async fn incident_transactions(&self, address: &str, chain: Chain) -> Result<Vec<Transaction>>;
}

/// TagLookup - known labels for an address (absence is the common case)
pub trait TagLookup: Send + Sync {
    fn tags(&self, address: &str) -> BTreeSet<CounterpartyTag>;
}

// ============================================================================
// TAG REGISTRY
// ============================================================================

/// Known mixer contracts shipped with the default registry
pub const KNOWN_MIXERS: &[&str] = &[
    // Tornado Cash Router
    "0xd90e2f925da726b50c4ed8d0fb90ad053324f31b",
    // Tornado Cash 0.1 ETH
    "0x722122df12d4e14e13ac3b6895a86e84145b6967",
];

#[derive(Debug, Clone, Default)]
pub struct TagRegistry {
    tags: HashMap<String, BTreeSet<CounterpartyTag>>,
}

impl TagRegistry {
    pub fn new() -> Self {
        TagRegistry::default()
    }

    /// Registry pre-loaded with the known mixer contracts
    pub fn with_defaults() -> Self {
        let mut registry = TagRegistry::new();
        for mixer in KNOWN_MIXERS {
            registry.tag(mixer, CounterpartyTag::Mixer);
        }
        registry
    }

    pub fn tag(&mut self, address: &str, tag: CounterpartyTag) {
        self.tags
            .entry(normalize_address(address))
            .or_default()
            .insert(tag);
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }
}

impl TagLookup for TagRegistry {
    fn tags(&self, address: &str) -> BTreeSet<CounterpartyTag> {
        self.tags
            .get(&normalize_address(address))
            .cloned()
            .unwrap_or_default()
    }
}

// ============================================================================
// IN-MEMORY GRAPH
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaggedAddress {
    pub address: String,
    pub tags: Vec<CounterpartyTag>,
}

/// Serialized graph snapshot (JSON)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphSnapshot {
    #[serde(default)]
    pub transactions: Vec<Transaction>,

    #[serde(default)]
    pub tags: Vec<TaggedAddress>,
}

/// Graph accessor over a fixed snapshot (files, fixtures, replay)
#[derive(Debug, Clone, Default)]
pub struct InMemoryGraph {
    by_address: HashMap<String, Vec<Transaction>>,
    tags: TagRegistry,
}

impl InMemoryGraph {
    pub fn new() -> Self {
        InMemoryGraph::default()
    }

    pub fn from_snapshot(snapshot: GraphSnapshot) -> Self {
        let mut graph = InMemoryGraph {
            by_address: HashMap::new(),
            tags: TagRegistry::with_defaults(),
        };
        for tx in snapshot.transactions {
            graph.add_transaction(tx);
        }
        for tagged in snapshot.tags {
            for tag in tagged.tags {
                graph.tags.tag(&tagged.address, tag);
            }
        }
        graph
    }

    /// Load a snapshot from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read graph snapshot: {:?}", path.as_ref()))?;

        let snapshot: GraphSnapshot =
            serde_json::from_str(&content).context("Failed to parse graph snapshot JSON")?;

        Ok(Self::from_snapshot(snapshot))
    }

    /// Index a transaction under both endpoints
    pub fn add_transaction(&mut self, tx: Transaction) {
        let tx = tx.normalized();
        self.by_address
            .entry(tx.source.clone())
            .or_default()
            .push(tx.clone());
        if tx.destination != tx.source {
            self.by_address
                .entry(tx.destination.clone())
                .or_default()
                .push(tx);
        }
    }

    pub fn tag(&mut self, address: &str, tag: CounterpartyTag) {
        self.tags.tag(address, tag);
    }

    pub fn tag_registry(&self) -> &TagRegistry {
        &self.tags
    }

    pub fn address_count(&self) -> usize {
        self.by_address.len()
    }
}

#[async_trait]
impl GraphAccessor for InMemoryGraph {
    async fn incident_transactions(&self, address: &str, chain: Chain) -> Result<Vec<Transaction>> {
        let txs = self
            .by_address
            .get(&normalize_address(address))
            .map(|txs| {
                txs.iter()
                    .filter(|tx| {
                        chain == Chain::Unknown
                            || tx.chain == chain
                            || tx.destination_chain == Some(chain)
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(txs)
    }
}

impl TagLookup for InMemoryGraph {
    fn tags(&self, address: &str) -> BTreeSet<CounterpartyTag> {
        self.tags.tags(address)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::io::Write;

    #[test]
    fn test_default_registry_knows_tornado_cash() {
        let registry = TagRegistry::with_defaults();
        let tags = registry.tags("0xD90E2F925DA726B50C4ED8D0FB90AD053324F31B");
        assert!(tags.contains(&CounterpartyTag::Mixer));
        assert!(registry.tags("0x0000000000000000000000000000000000000001").is_empty());
    }

    #[tokio::test]
    async fn test_transactions_indexed_under_both_endpoints() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let mut graph = InMemoryGraph::new();
        graph.add_transaction(Transaction::new("0xA", "0xB", 2.0, ts, Chain::Ethereum));
        graph.add_transaction(Transaction::new("0xB", "TXtron", 1.0, ts, Chain::Tron));

        let a = graph.incident_transactions("0xa", Chain::Ethereum).await.unwrap();
        let b = graph.incident_transactions("0xB", Chain::Ethereum).await.unwrap();
        let b_any = graph.incident_transactions("0xb", Chain::Unknown).await.unwrap();
        let missing = graph.incident_transactions("0xc", Chain::Ethereum).await.unwrap();

        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 1);
        assert_eq!(b_any.len(), 2);
        assert!(missing.is_empty());
    }

    #[test]
    fn test_snapshot_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "transactions": [
                    {{"source": "0xS", "destination": "0xM", "amount": 5.0,
                      "timestamp": "2024-05-01T00:00:00Z", "chain": "ethereum"}}
                ],
                "tags": [{{"address": "0xM", "tags": ["mixer"]}}]
            }}"#
        )
        .unwrap();

        let graph = InMemoryGraph::from_file(file.path()).unwrap();
        assert_eq!(graph.address_count(), 2);
        assert!(graph.tags("0xm").contains(&CounterpartyTag::Mixer));
    }
}
