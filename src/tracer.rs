// 🔎 Network Tracer - Bounded BFS from a seed address
//
// Level-by-level expansion: all fetches for one hop level finish (or fail)
// before the next level starts. Visitation and hop assignment happen on the
// calling task only, so a node's hop is its shortest classified-edge distance.

use crate::classifier::{ClassificationContext, EvasionPattern, PatternClassifier};
use crate::config::{Settings, TracerConfig};
use crate::error::TraceError;
use crate::graph::{GraphAccessor, TagLookup};
use crate::index::{DesignatedSetHandle, DesignatedSetIndex};
use crate::models::{normalize_address, validate_address, Chain, Transaction, TxKey};
use crate::scorer::{RiskScorer, RiskTier};
use futures_util::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// REQUEST
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceRequest {
    seed: String,
    chain: Chain,
    max_hops: u32,
}

impl TraceRequest {
    /// Validate a request before any work is attempted
    pub fn new(seed: &str, chain: Chain, max_hops: i64, config: &TracerConfig) -> Result<Self, TraceError> {
        validate_address(seed)
            .map_err(|reason| TraceError::InvalidRequest(format!("seed address: {}", reason)))?;

        if max_hops < 0 {
            return Err(TraceError::InvalidRequest(format!(
                "max_hops must be non-negative, got {}",
                max_hops
            )));
        }
        if max_hops > i64::from(config.max_hops_limit) {
            return Err(TraceError::InvalidRequest(format!(
                "max_hops {} exceeds limit {}",
                max_hops, config.max_hops_limit
            )));
        }

        Ok(TraceRequest {
            seed: normalize_address(seed),
            chain,
            max_hops: max_hops as u32,
        })
    }

    pub fn with_default_hops(seed: &str, chain: Chain, config: &TracerConfig) -> Result<Self, TraceError> {
        Self::new(seed, chain, i64::from(config.default_max_hops), config)
    }

    pub fn seed(&self) -> &str {
        &self.seed
    }

    pub fn chain(&self) -> Chain {
        self.chain
    }

    pub fn max_hops(&self) -> u32 {
        self.max_hops
    }
}

// ============================================================================
// RESULT SUBGRAPH
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    /// Not designated, no designated neighbour in the result
    None,
    /// The address itself is designated
    DirectHit,
    /// Not designated, but shares a traced edge with a designated address
    Adjacent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceNode {
    pub address: String,
    pub chain: Chain,

    /// Hops from the seed (0 = seed), fixed at first visit
    pub hop: u32,

    pub status: NodeStatus,

    /// Owning entity when the address is designated
    pub entity_id: Option<String>,

    /// Shortest distance to a designated address within the result subgraph
    pub distance_from_designated: Option<u32>,

    pub risk_score: f64,
    pub tier: RiskTier,

    /// Accessor failed or timed out while expanding this node
    pub incomplete: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEdge {
    pub transaction: Transaction,
    pub pattern: EvasionPattern,

    /// Rule that produced the pattern (None = ambiguity fallback)
    pub rule_id: Option<String>,

    pub risk_score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Coverage {
    Full,
    Partial { unreachable: usize },
}

impl Coverage {
    pub fn is_full(&self) -> bool {
        matches!(self, Coverage::Full)
    }
}

/// Recovered node-level fault, kept for the investigator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceFault {
    pub address: String,
    pub kind: String,
    pub message: String,
}

impl TraceFault {
    fn from_error(address: &str, err: &TraceError) -> Self {
        TraceFault {
            address: address.to_string(),
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceResult {
    pub seed: String,
    pub max_hops: u32,

    /// Sorted by (hop, address)
    pub nodes: Vec<TraceNode>,

    /// Sorted by (source, destination, timestamp, amount)
    pub edges: Vec<TraceEdge>,

    pub coverage: Coverage,
    pub faults: Vec<TraceFault>,

    /// Designated-set snapshot the trace ran against
    pub index_fingerprint: String,
}

impl TraceResult {
    pub fn node(&self, address: &str) -> Option<&TraceNode> {
        let key = normalize_address(address);
        self.nodes.iter().find(|n| n.address == key)
    }

    pub fn edges_between(&self, a: &str, b: &str) -> Vec<&TraceEdge> {
        let (a, b) = (normalize_address(a), normalize_address(b));
        self.edges
            .iter()
            .filter(|e| {
                let tx = &e.transaction;
                (tx.source == a && tx.destination == b) || (tx.source == b && tx.destination == a)
            })
            .collect()
    }

    /// Mixing and layering edges
    pub fn high_risk_edges(&self) -> Vec<&TraceEdge> {
        self.edges.iter().filter(|e| e.pattern.is_high_risk()).collect()
    }

    pub fn max_hop(&self) -> u32 {
        self.nodes.iter().map(|n| n.hop).max().unwrap_or(0)
    }

    /// SHA-256 over the canonical JSON of nodes, edges and coverage
    pub fn fingerprint(&self) -> Result<String, serde_json::Error> {
        let canonical = serde_json::to_vec(&(&self.nodes, &self.edges, &self.coverage))?;
        Ok(format!("{:x}", Sha256::digest(&canonical)))
    }

    pub fn summary(&self) -> String {
        let coverage = match self.coverage {
            Coverage::Full => "full".to_string(),
            Coverage::Partial { unreachable } => format!("partial ({} unreachable)", unreachable),
        };
        format!(
            "{} nodes, {} edges ({} high-risk), coverage {}",
            self.nodes.len(),
            self.edges.len(),
            self.high_risk_edges().len(),
            coverage
        )
    }
}

// ============================================================================
// TRAVERSAL STATE
// ============================================================================

#[derive(Debug, Clone)]
struct Visit {
    hop: u32,
    chain: Chain,

    /// Distance from the nearest designated address (or anchored seed) along
    /// the path that first reached this node
    anchor: Option<u32>,

    incomplete: bool,
}

type FetchOutcome = (String, Result<Vec<Transaction>, TraceError>);

// ============================================================================
// NETWORK TRACER
// ============================================================================

pub struct NetworkTracer {
    accessor: Arc<dyn GraphAccessor>,
    tags: Arc<dyn TagLookup>,
    designated: Arc<DesignatedSetHandle>,
    classifier: PatternClassifier,
    scorer: RiskScorer,
    config: TracerConfig,
}

impl NetworkTracer {
    pub fn new(
        accessor: Arc<dyn GraphAccessor>,
        tags: Arc<dyn TagLookup>,
        designated: Arc<DesignatedSetHandle>,
        settings: &Settings,
    ) -> Self {
        NetworkTracer {
            accessor,
            tags,
            designated,
            classifier: PatternClassifier::new(&settings.tracer),
            scorer: RiskScorer::new(settings.scoring.clone()),
            config: settings.tracer.clone(),
        }
    }

    /// Builder pattern: replace the default evasion rules
    pub fn with_classifier(mut self, classifier: PatternClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn config(&self) -> &TracerConfig {
        &self.config
    }

    /// Validate a request against this tracer's limits
    pub fn request(&self, seed: &str, chain: Chain, max_hops: Option<i64>) -> Result<TraceRequest, TraceError> {
        match max_hops {
            Some(hops) => TraceRequest::new(seed, chain, hops, &self.config),
            None => TraceRequest::with_default_hops(seed, chain, &self.config),
        }
    }

    /// Walk the graph outward from the seed and assemble the annotated subgraph
    ///
    /// Accessor failures and timeouts mark the node incomplete and are
    /// reported through `coverage`; they never abort the trace.
    pub async fn trace(&self, request: &TraceRequest) -> Result<TraceResult, TraceError> {
        // One snapshot for the whole trace, refreshes do not leak in mid-walk
        let index = self.designated.snapshot();
        let seed = request.seed().to_string();

        let seed_anchor = if index.is_designated(&seed) || self.config.anchor_seed {
            Some(0)
        } else {
            None
        };

        let mut visits: BTreeMap<String, Visit> = BTreeMap::new();
        visits.insert(
            seed.clone(),
            Visit {
                hop: 0,
                chain: request.chain(),
                anchor: seed_anchor,
                incomplete: false,
            },
        );

        // Each transaction is classified once, from whichever endpoint reaches it first
        let mut judged: HashSet<TxKey> = HashSet::new();
        let mut edges: Vec<TraceEdge> = Vec::new();
        let mut faults: Vec<TraceFault> = Vec::new();
        let mut frontier = vec![seed.clone()];

        for hop in 0..request.max_hops() {
            if frontier.is_empty() {
                break;
            }
            frontier.sort();

            tracing::debug!(target: "tracer", hop, frontier = frontier.len(), "expanding hop level");

            let fetched = self.fetch_level(&frontier, &visits).await;
            let mut next = Vec::new();

            for (address, outcome) in fetched {
                let raw = match outcome {
                    Ok(txs) => txs,
                    Err(err) => {
                        tracing::warn!(target: "tracer", address = %address, error = %err, "node incomplete");
                        if let Some(visit) = visits.get_mut(&address) {
                            visit.incomplete = true;
                        }
                        faults.push(TraceFault::from_error(&address, &err));
                        continue;
                    }
                };

                let parent_anchor = visits.get(&address).and_then(|v| v.anchor);
                let (txs, historical_volume) = self.prepare(&address, raw);

                for tx in txs {
                    let counterparty = match tx.counterparty_of(&address) {
                        Some(c) => c.to_string(),
                        None => continue,
                    };
                    if !judged.insert(tx.key()) {
                        continue;
                    }

                    // Nearer of the two endpoints, so either side sees the same distance
                    let counterparty_anchor = visits.get(&counterparty).and_then(|v| v.anchor);
                    let nearest_anchor = match (parent_anchor, counterparty_anchor) {
                        (Some(a), Some(b)) => Some(a.min(b)),
                        (a, b) => a.or(b),
                    };

                    let counterparty_designated = index.is_designated(&counterparty);
                    let mut counterparty_tags = self.tags.tags(&counterparty);
                    if let Some(tag) = tx.counterparty_tag {
                        counterparty_tags.insert(tag);
                    }

                    let ctx = ClassificationContext {
                        counterparty_designated,
                        endpoint_designated: counterparty_designated || index.is_designated(&address),
                        counterparty_tags,
                        cross_chain: tx.is_cross_chain(),
                        hops_from_designated: nearest_anchor.map(|d| d + 1),
                    };

                    let classification = match self.classifier.classify(&tx, &ctx) {
                        Some(c) => c,
                        None => continue,
                    };

                    if !visits.contains_key(&counterparty) {
                        let chain = if tx.destination == counterparty {
                            tx.destination_chain.unwrap_or(tx.chain)
                        } else {
                            tx.chain
                        };
                        let anchor = if counterparty_designated {
                            Some(0)
                        } else {
                            ctx.hops_from_designated
                        };
                        visits.insert(
                            counterparty.clone(),
                            Visit {
                                hop: hop + 1,
                                chain,
                                anchor,
                                incomplete: false,
                            },
                        );
                        next.push(counterparty);
                    }

                    let risk_score = self
                        .scorer
                        .edge_score(classification.pattern, tx.amount, historical_volume);

                    edges.push(TraceEdge {
                        transaction: tx,
                        pattern: classification.pattern,
                        rule_id: classification.rule_id,
                        risk_score,
                    });
                }
            }

            frontier = next;
        }

        let result = self.assemble(request, &index, visits, edges, faults);
        let seed_prefix: String = seed.chars().take(12).collect();

        tracing::info!(
            target: "tracer",
            seed = %seed_prefix,
            nodes = result.nodes.len(),
            edges = result.edges.len(),
            high_risk = result.high_risk_edges().len(),
            complete = result.coverage.is_full(),
            "trace complete"
        );

        Ok(result)
    }

    /// Fetch incident transactions for one hop level, bounded concurrency,
    /// results returned in frontier order
    async fn fetch_level(&self, frontier: &[String], visits: &BTreeMap<String, Visit>) -> Vec<FetchOutcome> {
        let timeout_ms = self.config.accessor_timeout_ms;
        let budget = Duration::from_millis(timeout_ms);

        stream::iter(frontier.iter().map(|address| {
            let chain = visits.get(address).map_or(Chain::Unknown, |v| v.chain);
            let accessor = Arc::clone(&self.accessor);
            let address = address.clone();

            async move {
                let outcome =
                    match tokio::time::timeout(budget, accessor.incident_transactions(&address, chain)).await {
                        Ok(Ok(txs)) => Ok(txs),
                        Ok(Err(err)) => Err(TraceError::Accessor {
                            address: address.clone(),
                            reason: format!("{:#}", err),
                        }),
                        Err(_) => Err(TraceError::Timeout {
                            address: address.clone(),
                            timeout_ms,
                        }),
                    };
                (address, outcome)
            }
        }))
        .buffered(self.config.fetch_concurrency.max(1))
        .collect()
        .await
    }

    /// Normalize, keep incident edges only, dedup, order deterministically and
    /// cap the fan-out. Also returns the address's total incident volume.
    fn prepare(&self, address: &str, raw: Vec<Transaction>) -> (Vec<Transaction>, f64) {
        let mut by_key: HashMap<TxKey, Transaction> = HashMap::new();
        for tx in raw {
            let tx = tx.normalized();
            if tx.counterparty_of(address).is_none() {
                continue;
            }
            // Among duplicates keep the one with the smallest hash
            match by_key.entry(tx.key()) {
                Entry::Occupied(mut slot) => {
                    if tx.tx_hash < slot.get().tx_hash {
                        slot.insert(tx);
                    }
                }
                Entry::Vacant(slot) => {
                    slot.insert(tx);
                }
            }
        }

        // Newest first so the cap keeps recent activity
        let mut txs: Vec<(TxKey, Transaction)> = by_key.into_iter().collect();
        txs.sort_by(|a, b| {
            b.1.timestamp
                .cmp(&a.1.timestamp)
                .then_with(|| a.0.cmp(&b.0))
        });

        let historical_volume: f64 = txs
            .iter()
            .map(|(_, tx)| tx.amount)
            .filter(|a| a.is_finite() && *a > 0.0)
            .sum();

        let cap = self.config.max_transactions_per_address;
        if txs.len() > cap {
            tracing::debug!(target: "tracer", address, total = txs.len(), cap, "fan-out capped");
            txs.truncate(cap);
        }

        (txs.into_iter().map(|(_, tx)| tx).collect(), historical_volume)
    }

    fn assemble(
        &self,
        request: &TraceRequest,
        index: &DesignatedSetIndex,
        visits: BTreeMap<String, Visit>,
        mut edges: Vec<TraceEdge>,
        faults: Vec<TraceFault>,
    ) -> TraceResult {
        edges.sort_by(|a, b| {
            a.transaction
                .key()
                .cmp(&b.transaction.key())
                .then_with(|| a.transaction.tx_hash.cmp(&b.transaction.tx_hash))
        });

        // Undirected adjacency over emitted edges, edge indices per address
        let mut incident: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
        for (i, edge) in edges.iter().enumerate() {
            let tx = &edge.transaction;
            incident.entry(tx.source.as_str()).or_default().push(i);
            if tx.destination != tx.source {
                incident.entry(tx.destination.as_str()).or_default().push(i);
            }
        }

        let distances = designated_distances(index, &visits, &edges, &incident);

        let mut nodes: Vec<TraceNode> = visits
            .iter()
            .map(|(address, visit)| {
                let entity_id = index.designated_address(address).map(|d| d.entity_id.clone());
                let edge_ids = incident.get(address.as_str()).map(Vec::as_slice).unwrap_or(&[]);

                let status = if entity_id.is_some() {
                    NodeStatus::DirectHit
                } else if edge_ids.iter().any(|&i| {
                    edges[i]
                        .transaction
                        .counterparty_of(address)
                        .map_or(false, |c| index.is_designated(c))
                }) {
                    NodeStatus::Adjacent
                } else {
                    NodeStatus::None
                };

                let distance = distances.get(address.as_str()).copied();
                let risk_score = self
                    .scorer
                    .address_score(distance, edge_ids.iter().map(|&i| edges[i].risk_score));

                TraceNode {
                    address: address.clone(),
                    chain: visit.chain,
                    hop: visit.hop,
                    status,
                    entity_id,
                    distance_from_designated: distance,
                    risk_score,
                    tier: self.scorer.tier(risk_score),
                    incomplete: visit.incomplete,
                }
            })
            .collect();

        // BTreeMap order is by address; stable sort keeps it within a hop
        nodes.sort_by_key(|n| n.hop);

        let unreachable = nodes.iter().filter(|n| n.incomplete).count();
        let coverage = if unreachable == 0 {
            Coverage::Full
        } else {
            Coverage::Partial { unreachable }
        };

        TraceResult {
            seed: request.seed().to_string(),
            max_hops: request.max_hops(),
            nodes,
            edges,
            coverage,
            faults,
            index_fingerprint: index.fingerprint().to_string(),
        }
    }
}

/// Multi-source BFS from every designated node over the result edges
fn designated_distances<'a>(
    index: &DesignatedSetIndex,
    visits: &'a BTreeMap<String, Visit>,
    edges: &'a [TraceEdge],
    incident: &BTreeMap<&'a str, Vec<usize>>,
) -> HashMap<&'a str, u32> {
    let mut distances: HashMap<&str, u32> = HashMap::new();
    let mut queue: VecDeque<&str> = VecDeque::new();

    for address in visits.keys().filter(|a| index.is_designated(a)) {
        distances.insert(address.as_str(), 0);
        queue.push_back(address.as_str());
    }

    while let Some(address) = queue.pop_front() {
        let d = distances.get(address).copied().unwrap_or(0);
        for &i in incident.get(address).map(Vec::as_slice).unwrap_or(&[]) {
            if let Some(next) = edges[i].transaction.counterparty_of(address) {
                if !distances.contains_key(next) {
                    distances.insert(next, d + 1);
                    queue.push_back(next);
                }
            }
        }
    }

    distances
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::InMemoryGraph;
    use crate::models::{CounterpartyTag, CryptoAddress, DesignationStatus, SanctionedEntity};
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};

    fn ts(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, minute, 0).unwrap()
    }

    fn tx(from: &str, to: &str, amount: f64, minute: u32) -> Transaction {
        Transaction::new(from, to, amount, ts(minute), Chain::Ethereum)
    }

    fn graph(txs: Vec<Transaction>) -> InMemoryGraph {
        let mut graph = InMemoryGraph::new();
        for t in txs {
            graph.add_transaction(t);
        }
        graph
    }

    fn designated(addresses: &[&str]) -> Arc<DesignatedSetHandle> {
        let handle = DesignatedSetHandle::default();
        let entity = SanctionedEntity {
            id: "garantex".to_string(),
            name: "Garantex".to_string(),
            aliases: Vec::new(),
            entity_type: "exchange".to_string(),
            designations: Vec::new(),
            status: DesignationStatus::Designated,
            addresses: addresses.iter().map(|a| CryptoAddress::new(Chain::Ethereum, a)).collect(),
            programs: Vec::new(),
            country: None,
            is_exchange: true,
            exchange_name: Some("garantex".to_string()),
            volume_estimate_usd: None,
        };
        handle.refresh(&[entity]);
        Arc::new(handle)
    }

    fn tracer_with(graph: InMemoryGraph, handle: Arc<DesignatedSetHandle>, settings: &Settings) -> NetworkTracer {
        let graph = Arc::new(graph);
        NetworkTracer::new(graph.clone(), graph, handle, settings)
    }

    fn tracer(graph: InMemoryGraph) -> NetworkTracer {
        tracer_with(graph, Arc::new(DesignatedSetHandle::default()), &Settings::default())
    }

    async fn run(tracer: &NetworkTracer, seed: &str, max_hops: i64) -> TraceResult {
        let request = tracer.request(seed, Chain::Ethereum, Some(max_hops)).unwrap();
        tracer.trace(&request).await.unwrap()
    }

    /// Accessor double: one address hangs, another fails
    struct FlakyAccessor {
        inner: InMemoryGraph,
        slow: String,
        broken: String,
    }

    #[async_trait]
    impl GraphAccessor for FlakyAccessor {
        async fn incident_transactions(&self, address: &str, chain: Chain) -> anyhow::Result<Vec<Transaction>> {
            if address == self.slow {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
            if address == self.broken {
                anyhow::bail!("explorer unreachable");
            }
            self.inner.incident_transactions(address, chain).await
        }
    }

    #[tokio::test]
    async fn test_mixer_counterparty_is_critical() {
        let mut g = graph(vec![tx("addr_S", "addr_M", 5.0, 0)]);
        g.tag("addr_M", CounterpartyTag::Mixer);
        let result = run(&tracer(g), "addr_S", 1).await;

        assert_eq!(result.nodes.len(), 2);
        assert_eq!(result.node("addr_S").unwrap().hop, 0);
        let m = result.node("addr_M").unwrap();
        assert_eq!(m.hop, 1);
        assert_eq!(m.tier, RiskTier::Critical);

        assert_eq!(result.edges.len(), 1);
        assert_eq!(result.edges[0].pattern, EvasionPattern::Mixing);
        assert_eq!(result.high_risk_edges().len(), 1);
    }

    #[tokio::test]
    async fn test_two_hop_path_is_layering() {
        let g = graph(vec![tx("addr_S", "addr_A", 5.0, 0), tx("addr_A", "addr_B", 5.0, 1)]);
        let result = run(&tracer(g), "addr_S", 2).await;

        assert_eq!(result.node("addr_B").unwrap().hop, 2);
        let a_b = result.edges_between("addr_A", "addr_B");
        assert_eq!(a_b.len(), 1);
        assert_eq!(a_b[0].pattern, EvasionPattern::Layering);
        assert_eq!(result.edges_between("addr_S", "addr_A")[0].pattern, EvasionPattern::Direct);
    }

    #[tokio::test]
    async fn test_diamond_visits_once_at_shortest_hop() {
        let g = graph(vec![
            tx("addr_S", "addr_A", 1.0, 0),
            tx("addr_S", "addr_B", 1.0, 1),
            tx("addr_A", "addr_C", 1.0, 2),
            tx("addr_B", "addr_C", 1.0, 3),
        ]);
        let result = run(&tracer(g), "addr_S", 3).await;

        let c: Vec<_> = result.nodes.iter().filter(|n| n.address == "addr_C").collect();
        assert_eq!(c.len(), 1);
        assert_eq!(c[0].hop, 2);
        assert_eq!(result.nodes.len(), 4);
        assert_eq!(result.edges.len(), 4);
    }

    #[tokio::test]
    async fn test_shortcut_wins_over_longer_path() {
        let g = graph(vec![
            tx("addr_S", "addr_A", 1.0, 0),
            tx("addr_A", "addr_B", 1.0, 1),
            tx("addr_S", "addr_B", 1.0, 2),
        ]);
        let result = run(&tracer(g), "addr_S", 2).await;

        assert_eq!(result.node("addr_B").unwrap().hop, 1);
    }

    #[tokio::test]
    async fn test_max_hops_zero_returns_seed_only() {
        let g = graph(vec![tx("addr_S", "addr_A", 1.0, 0)]);
        let result = run(&tracer(g), "addr_S", 0).await;

        assert_eq!(result.nodes.len(), 1);
        assert_eq!(result.nodes[0].address, "addr_S");
        assert!(result.edges.is_empty());
        assert!(result.coverage.is_full());
    }

    #[tokio::test]
    async fn test_no_node_beyond_max_hops() {
        let g = graph(vec![
            tx("n0", "n1", 1.0, 0),
            tx("n1", "n2", 1.0, 1),
            tx("n2", "n3", 1.0, 2),
            tx("n3", "n4", 1.0, 3),
        ]);
        let result = run(&tracer(g), "n0", 2).await;

        assert_eq!(result.max_hop(), 2);
        assert!(result.node("n3").is_none());
    }

    #[tokio::test]
    async fn test_unknown_seed_returns_single_node() {
        let result = run(&tracer(InMemoryGraph::new()), "addr_nowhere", 3).await;

        assert_eq!(result.nodes.len(), 1);
        assert_eq!(result.nodes[0].hop, 0);
        assert!(result.coverage.is_full());
    }

    #[tokio::test]
    async fn test_timeout_marks_partial_coverage() {
        let inner = graph(vec![
            tx("addr_S", "addr_A", 1.0, 0),
            tx("addr_S", "addr_B", 1.0, 1),
            tx("addr_A", "addr_C", 1.0, 2),
            tx("addr_B", "addr_D", 1.0, 3),
        ]);
        let accessor = Arc::new(FlakyAccessor {
            inner,
            slow: "addr_B".to_string(),
            broken: String::new(),
        });
        let mut settings = Settings::default();
        settings.tracer.accessor_timeout_ms = 50;
        let tracer = NetworkTracer::new(
            accessor,
            Arc::new(crate::graph::TagRegistry::new()),
            Arc::new(DesignatedSetHandle::default()),
            &settings,
        );

        let result = run(&tracer, "addr_S", 2).await;

        assert_eq!(result.coverage, Coverage::Partial { unreachable: 1 });
        assert!(result.node("addr_B").unwrap().incomplete);
        assert_eq!(result.node("addr_C").unwrap().hop, 2);
        assert!(result.node("addr_D").is_none());
        assert_eq!(result.faults.len(), 1);
        assert_eq!(result.faults[0].kind, "timeout");
    }

    #[tokio::test]
    async fn test_accessor_failure_is_not_fatal() {
        let inner = graph(vec![tx("addr_S", "addr_A", 1.0, 0), tx("addr_A", "addr_B", 1.0, 1)]);
        let accessor = Arc::new(FlakyAccessor {
            inner,
            slow: String::new(),
            broken: "addr_A".to_string(),
        });
        let tracer = NetworkTracer::new(
            accessor,
            Arc::new(crate::graph::TagRegistry::new()),
            Arc::new(DesignatedSetHandle::default()),
            &Settings::default(),
        );

        let result = run(&tracer, "addr_S", 3).await;

        assert_eq!(result.nodes.len(), 2);
        assert_eq!(result.coverage, Coverage::Partial { unreachable: 1 });
        assert_eq!(result.faults[0].kind, "accessor");
    }

    #[tokio::test]
    async fn test_duplicate_transactions_deduplicated() {
        let g = graph(vec![
            tx("addr_S", "addr_A", 2.0, 0).with_hash("0x01"),
            tx("addr_S", "addr_A", 2.0, 0).with_hash("0x02"),
            tx("addr_S", "addr_A", 2.0, 5),
        ]);
        let result = run(&tracer(g), "addr_S", 1).await;

        assert_eq!(result.edges.len(), 2);
        assert_eq!(result.edges[0].transaction.tx_hash.as_deref(), Some("0x01"));
    }

    #[tokio::test]
    async fn test_trace_is_deterministic() {
        let txs = vec![
            tx("addr_S", "addr_A", 3.0, 0),
            tx("addr_S", "addr_B", 1.0, 1),
            tx("addr_B", "addr_C", 7.0, 2),
            tx("addr_A", "addr_C", 2.0, 3),
            tx("addr_C", "addr_S", 1.0, 4),
        ];
        let mut reversed = txs.clone();
        reversed.reverse();

        let first = run(&tracer(graph(txs.clone())), "addr_S", 3).await;
        let again = run(&tracer(graph(txs)), "addr_S", 3).await;
        let shuffled = run(&tracer(graph(reversed)), "addr_S", 3).await;

        assert_eq!(first, again);
        assert_eq!(first.fingerprint().unwrap(), shuffled.fingerprint().unwrap());
    }

    #[tokio::test]
    async fn test_designated_seed_and_neighbours() {
        let handle = designated(&["0xAAA1"]);
        let g = graph(vec![tx("0xaaa1", "0xbbb2", 10.0, 0), tx("0xbbb2", "0xccc3", 10.0, 1)]);
        let tracer = tracer_with(g, handle, &Settings::default());

        let result = run(&tracer, "0xAAA1", 2).await;

        let seed = result.node("0xaaa1").unwrap();
        assert_eq!(seed.status, NodeStatus::DirectHit);
        assert_eq!(seed.entity_id.as_deref(), Some("garantex"));
        assert_eq!(seed.risk_score, 100.0);

        let b = result.node("0xbbb2").unwrap();
        assert_eq!(b.status, NodeStatus::Adjacent);
        assert_eq!(b.distance_from_designated, Some(1));

        let c = result.node("0xccc3").unwrap();
        assert_eq!(c.status, NodeStatus::None);
        assert_eq!(c.distance_from_designated, Some(2));
        assert!(c.risk_score <= b.risk_score);
    }

    #[tokio::test]
    async fn test_unanchored_seed_emits_only_related_edges() {
        let handle = designated(&["0xd00d"]);
        let g = graph(vec![tx("0xseed", "0xd00d", 1.0, 0), tx("0xseed", "0xclean", 1.0, 1)]);
        let mut settings = Settings::default();
        settings.tracer.anchor_seed = false;
        let tracer = tracer_with(g, handle, &settings);

        let result = run(&tracer, "0xseed", 1).await;

        assert!(result.node("0xd00d").is_some());
        assert!(result.node("0xclean").is_none());
        assert_eq!(result.edges.len(), 1);
        assert_eq!(result.node("0xseed").unwrap().status, NodeStatus::Adjacent);
    }

    #[tokio::test]
    async fn test_unclassified_edge_not_revisited_from_far_side() {
        let handle = designated(&["0xd00d"]);
        let g = graph(vec![
            tx("0xseed", "0xd00d", 1.0, 0),
            tx("0xd00d", "0xaaaa", 1.0, 1),
            tx("0xseed", "0xaaaa", 1.0, 2),
        ]);
        let mut settings = Settings::default();
        settings.tracer.anchor_seed = false;
        let tracer = tracer_with(g, handle, &settings);

        let result = run(&tracer, "0xseed", 3).await;

        assert_eq!(result.node("0xaaaa").unwrap().hop, 2);
        assert!(result.edges_between("0xseed", "0xaaaa").is_empty());
        for edge in &result.edges {
            let from = result.node(&edge.transaction.source).unwrap().hop;
            let to = result.node(&edge.transaction.destination).unwrap().hop;
            assert!(from.abs_diff(to) <= 1, "edge spans {} -> {}", from, to);
        }
    }

    #[tokio::test]
    async fn test_cross_chain_edge_is_chain_hopping() {
        let g = graph(vec![tx("0xseed", "TBridgeOut", 4.0, 0).with_destination_chain(Chain::Tron)]);
        let result = run(&tracer(g), "0xseed", 1).await;

        assert_eq!(result.edges[0].pattern, EvasionPattern::ChainHopping);
        assert_eq!(result.node("TBridgeOut").unwrap().chain, Chain::Tron);
    }

    #[tokio::test]
    async fn test_fan_out_is_capped() {
        let txs: Vec<Transaction> = (0..10).map(|i| tx("addr_S", &format!("addr_{}", i), 1.0, i)).collect();
        let mut settings = Settings::default();
        settings.tracer.max_transactions_per_address = 4;
        let tracer = tracer_with(graph(txs), Arc::new(DesignatedSetHandle::default()), &settings);

        let result = run(&tracer, "addr_S", 1).await;
        assert_eq!(result.edges.len(), 4);
        assert_eq!(result.nodes.len(), 5);
        assert!(result.node("addr_9").is_some());
        assert!(result.node("addr_0").is_none());
    }

    #[tokio::test]
    async fn test_fan_out_cap_keeps_newest() {
        let g = graph(vec![
            tx("addr_S", "addr_a", 1.0, 0),
            tx("addr_S", "addr_z", 1.0, 5),
        ]);
        let mut settings = Settings::default();
        settings.tracer.max_transactions_per_address = 1;
        let tracer = tracer_with(g, Arc::new(DesignatedSetHandle::default()), &settings);

        let result = run(&tracer, "addr_S", 1).await;

        assert_eq!(result.edges.len(), 1);
        assert!(result.node("addr_z").is_some());
        assert!(result.node("addr_a").is_none());
    }

    #[tokio::test]
    async fn test_aggregated_entities_feed_the_trace() {
        use crate::aggregator::SanctionsAggregator;
        use crate::config::AggregatorConfig;
        use crate::normalizer::RawRecord;
        use crate::models::SanctionsSource;

        let records = vec![
            RawRecord::new(SanctionsSource::Ofac)
                .with_name("Garantex Europe OU")
                .with_address(Chain::Ethereum, "0x6F1CA141A28907F78EBAA64FB83A9088B02A8352"),
            RawRecord::new(SanctionsSource::Eu)
                .with_name("Garantex")
                .with_address(Chain::Ethereum, "0x6f1ca141a28907f78ebaa64fb83a9088b02a8352")
                .with_status(DesignationStatus::Designated),
        ];
        let report = SanctionsAggregator::new(AggregatorConfig::default()).aggregate(&records);
        assert_eq!(report.entities.len(), 1);

        let handle = Arc::new(DesignatedSetHandle::default());
        handle.refresh(&report.entities);

        let g = graph(vec![tx("0xfeed", "0x6f1ca141a28907f78ebaa64fb83a9088b02a8352", 50.0, 0)]);
        let tracer = tracer_with(g, handle, &Settings::default());
        let result = run(&tracer, "0xfeed", 1).await;

        let hit = result.node("0x6f1ca141a28907f78ebaa64fb83a9088b02a8352").unwrap();
        assert_eq!(hit.status, NodeStatus::DirectHit);
        assert_eq!(hit.entity_id, Some(report.entities[0].id.clone()));
        assert_eq!(result.node("0xfeed").unwrap().status, NodeStatus::Adjacent);
        assert_eq!(result.edges[0].rule_id.as_deref(), Some("designated-endpoint"));
    }

    #[test]
    fn test_invalid_requests_rejected() {
        let config = TracerConfig::default();

        let negative = TraceRequest::new("addr_S", Chain::Ethereum, -1, &config);
        assert!(matches!(negative, Err(TraceError::InvalidRequest(_))));

        let too_deep = TraceRequest::new("addr_S", Chain::Ethereum, 99, &config);
        assert!(matches!(too_deep, Err(TraceError::InvalidRequest(_))));

        let empty = TraceRequest::new("  ", Chain::Ethereum, 1, &config);
        assert!(matches!(empty, Err(TraceError::InvalidRequest(_))));

        let malformed = TraceRequest::new("addr S!", Chain::Ethereum, 1, &config);
        assert!(matches!(malformed, Err(TraceError::InvalidRequest(_))));

        let ok = TraceRequest::with_default_hops(" 0xABC ", Chain::Ethereum, &config).unwrap();
        assert_eq!(ok.seed(), "0xabc");
        assert_eq!(ok.max_hops(), 3);
    }
}
