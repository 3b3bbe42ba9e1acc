// 🔍 Sanctions Aggregator - Merge records from every source into canonical entities
//
// Merge key:
// 1. Shared address → same entity (authoritative)
// 2. Same source + same source reference → same record seen twice
// 3. Similar names → NOT merged, a low-confidence cross-reference is attached
//
// Status conflicts: most recent dated designation wins, ties keep the more
// restrictive status (designated > delisted).

use crate::config::AggregatorConfig;
use crate::models::{
    normalize_address, Chain, CryptoAddress, DesignationStatus, SanctionedEntity, SanctionsSource,
    SourceDesignation,
};
use crate::normalizer::RawRecord;
use crate::quality::{DataQualityEngine, QualityReport};
use anyhow::Result;
use async_trait::async_trait;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use uuid::Uuid;

// ============================================================================
// SOURCE FEED
// ============================================================================

/// SanctionsFeed - one regulatory source, already fetched and normalized
///
/// Feeds may be partial or stale; a failing feed never aborts aggregation.
#[async_trait]
pub trait SanctionsFeed: Send + Sync {
    fn source(&self) -> SanctionsSource;

    async fn fetch(&self) -> Result<Vec<RawRecord>>;
}

/// Feed over records already in memory (files, fixtures)
pub struct StaticFeed {
    source: SanctionsSource,
    records: Vec<RawRecord>,
}

impl StaticFeed {
    pub fn new(source: SanctionsSource, records: Vec<RawRecord>) -> Self {
        StaticFeed { source, records }
    }
}

#[async_trait]
impl SanctionsFeed for StaticFeed {
    fn source(&self) -> SanctionsSource {
        self.source
    }

    async fn fetch(&self) -> Result<Vec<RawRecord>> {
        Ok(self.records.clone())
    }
}

// ============================================================================
// AGGREGATION OUTPUT
// ============================================================================

/// Two distinct entities whose names look alike (never merged)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossReference {
    pub entity_id: String,
    pub other_entity_id: String,

    /// Name similarity (0.0 - 1.0)
    pub confidence: f64,

    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregationReport {
    pub entities: Vec<SanctionedEntity>,
    pub cross_references: Vec<CrossReference>,

    /// Reports for records that had at least one issue
    pub quality: Vec<QualityReport>,

    pub records_in: usize,
    pub records_skipped: usize,
}

impl AggregationReport {
    pub fn summary(&self) -> String {
        format!(
            "{} records → {} entities ({} skipped, {} cross-references)",
            self.records_in,
            self.entities.len(),
            self.records_skipped,
            self.cross_references.len()
        )
    }

    pub fn find_by_address(&self, address: &str) -> Option<&SanctionedEntity> {
        self.entities.iter().find(|e| e.has_address(address))
    }

    pub fn cross_references_for(&self, entity_id: &str) -> Vec<&CrossReference> {
        self.cross_references
            .iter()
            .filter(|x| x.entity_id == entity_id || x.other_entity_id == entity_id)
            .collect()
    }
}

// ============================================================================
// UNION-FIND
// ============================================================================

struct DisjointSet {
    parent: Vec<usize>,
}

impl DisjointSet {
    fn new(size: usize) -> Self {
        DisjointSet {
            parent: (0..size).collect(),
        }
    }

    fn find(&mut self, mut i: usize) -> usize {
        while self.parent[i] != i {
            self.parent[i] = self.parent[self.parent[i]];
            i = self.parent[i];
        }
        i
    }

    /// Smaller root wins so group identity follows input order
    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            let (low, high) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[high] = low;
        }
    }
}

// ============================================================================
// AGGREGATOR
// ============================================================================

pub struct SanctionsAggregator {
    config: AggregatorConfig,
    quality: DataQualityEngine,
}

impl SanctionsAggregator {
    pub fn new(config: AggregatorConfig) -> Self {
        SanctionsAggregator {
            config,
            quality: DataQualityEngine::new(),
        }
    }

    /// Fetch every feed concurrently, then aggregate
    pub async fn collect(&self, feeds: &[Arc<dyn SanctionsFeed>]) -> AggregationReport {
        let results = join_all(feeds.iter().map(|feed| feed.fetch())).await;

        let mut records = Vec::new();
        for (feed, result) in feeds.iter().zip(results) {
            match result {
                Ok(batch) => {
                    tracing::info!(
                        target: "aggregator",
                        source = feed.source().code(),
                        records = batch.len(),
                        "fetched sanctions feed"
                    );
                    records.extend(batch);
                }
                Err(e) => {
                    tracing::warn!(
                        target: "aggregator",
                        source = feed.source().code(),
                        "sanctions feed failed, continuing without it: {e:#}"
                    );
                }
            }
        }

        self.aggregate(&records)
    }

    /// Merge raw records into canonical entities
    pub fn aggregate(&self, records: &[RawRecord]) -> AggregationReport {
        let mut quality = Vec::new();
        let mut usable = Vec::new();

        for record in records {
            let report = self.quality.validate(record);
            if let Some(fault) = report.fault() {
                tracing::warn!(target: "aggregator", "skipping record: {fault}");
            } else {
                usable.push(sanitize(record));
            }
            if !report.issues.is_empty() {
                quality.push(report);
            }
        }
        let records_skipped = records.len() - usable.len();

        // Stable order → deterministic names, ids and designation lists
        usable.sort_by(|a, b| {
            a.source
                .cmp(&b.source)
                .then_with(|| a.source_id.cmp(&b.source_id))
                .then_with(|| a.name.cmp(&b.name))
                .then_with(|| a.designation_date.cmp(&b.designation_date))
                .then_with(|| a.addresses.cmp(&b.addresses))
        });

        let groups = group_records(&usable);
        let mut entities: Vec<SanctionedEntity> = groups
            .values()
            .map(|members| {
                let group: Vec<&RawRecord> = members.iter().map(|&i| &usable[i]).collect();
                merge_group(&group)
            })
            .collect();
        entities.sort_by(|a, b| a.id.cmp(&b.id));

        let cross_references = self.cross_reference(&entities);

        let report = AggregationReport {
            entities,
            cross_references,
            quality,
            records_in: records.len(),
            records_skipped,
        };

        tracing::info!(target: "aggregator", "{}", report.summary());
        report
    }

    /// Pairwise name comparison between distinct entities
    fn cross_reference(&self, entities: &[SanctionedEntity]) -> Vec<CrossReference> {
        let mut refs = Vec::new();

        for i in 0..entities.len() {
            for j in (i + 1)..entities.len() {
                let (a, b) = (&entities[i], &entities[j]);

                let best = a
                    .all_names()
                    .iter()
                    .flat_map(|na| {
                        b.all_names()
                            .into_iter()
                            .map(move |nb| (na.clone(), nb))
                    })
                    .map(|(na, nb)| (name_similarity(&na, &nb, self.config.min_token_len), na, nb))
                    .max_by(|x, y| x.0.total_cmp(&y.0));

                if let Some((score, na, nb)) = best {
                    if score >= self.config.name_match_threshold {
                        refs.push(CrossReference {
                            entity_id: a.id.clone(),
                            other_entity_id: b.id.clone(),
                            confidence: score,
                            reason: format!("name similarity: {} ≈ {}", na, nb),
                        });
                    }
                }
            }
        }

        refs
    }
}

impl Default for SanctionsAggregator {
    fn default() -> Self {
        Self::new(AggregatorConfig::default())
    }
}

/// Drop the parts of a usable record that failed validation
fn sanitize(record: &RawRecord) -> RawRecord {
    let mut clean = record.clone();
    clean
        .addresses
        .retain(|a| crate::models::validate_address(&a.address).is_ok());
    if clean
        .volume_estimate_usd
        .map_or(false, |v| !v.is_finite() || v < 0.0)
    {
        clean.volume_estimate_usd = None;
    }
    clean
}

/// Union records sharing an address or a (source, reference) identity
fn group_records(records: &[RawRecord]) -> BTreeMap<usize, Vec<usize>> {
    let mut sets = DisjointSet::new(records.len());
    let mut by_key: HashMap<String, usize> = HashMap::new();

    for (i, record) in records.iter().enumerate() {
        let mut keys: Vec<String> = record
            .addresses
            .iter()
            .map(|a| format!("addr:{}", a.address))
            .collect();
        if let Some(id) = &record.source_id {
            keys.push(format!("ref:{}:{}", record.source.code(), id));
        } else if let Some(key) = resubmission_key(record) {
            keys.push(key);
        }

        for key in keys {
            match by_key.entry(key) {
                Entry::Occupied(seen) => sets.union(i, *seen.get()),
                Entry::Vacant(slot) => {
                    slot.insert(i);
                }
            }
        }
    }

    let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for i in 0..records.len() {
        let root = sets.find(i);
        groups.entry(root).or_default().push(i);
    }
    groups
}

/// Identity of a name-only, unreferenced record
///
/// Two such records are the same entity only when every identifying field
/// matches, so same-name people with different details stay apart.
fn resubmission_key(record: &RawRecord) -> Option<String> {
    if !record.addresses.is_empty() {
        return None;
    }
    let name = record.name.as_deref()?;

    let mut aliases: Vec<String> = record.aliases.iter().map(|a| normalize_name(a)).collect();
    aliases.sort();
    aliases.dedup();
    let mut programs = record.programs.clone();
    programs.sort();
    programs.dedup();

    Some(format!(
        "name:{}:{}:{}:{}:{}:{}:{}:{}",
        record.source.code(),
        normalize_name(name),
        record.designation_date.map(|d| d.to_string()).unwrap_or_default(),
        record.status.map(|s| s.as_str()).unwrap_or_default(),
        record.entity_type.as_deref().unwrap_or_default(),
        record.country.as_deref().unwrap_or_default(),
        aliases.join("|"),
        programs.join("|"),
    ))
}

/// Most recent dated designation wins; ties keep the more restrictive status
pub fn resolve_status(designations: &[SourceDesignation]) -> DesignationStatus {
    let latest = designations.iter().filter_map(|d| d.designation_date).max();

    designations
        .iter()
        .filter(|d| latest.is_none() || d.designation_date == latest)
        .map(|d| d.status)
        .max_by_key(|s| s.restrictiveness())
        .unwrap_or(DesignationStatus::Designated)
}

fn merge_group(group: &[&RawRecord]) -> SanctionedEntity {
    // Addresses: unique by string, a known chain beats Unknown
    let mut addresses: BTreeMap<String, Chain> = BTreeMap::new();
    for address in group.iter().flat_map(|r| r.addresses.iter()) {
        let chain = addresses.entry(address.address.clone()).or_insert(address.chain);
        if *chain == Chain::Unknown {
            *chain = address.chain;
        }
    }
    let addresses: Vec<CryptoAddress> = addresses
        .into_iter()
        .map(|(address, chain)| CryptoAddress { chain, address })
        .collect();

    let name = group
        .iter()
        .find_map(|r| r.name.clone())
        .or_else(|| addresses.first().map(|a| a.address.clone()))
        .unwrap_or_default();

    // Every other name spelling becomes an alias
    let name_key = normalize_name(&name);
    let mut seen: BTreeSet<String> = BTreeSet::new();
    seen.insert(name_key);
    let mut aliases: Vec<String> = Vec::new();
    for candidate in group
        .iter()
        .flat_map(|r| r.name.iter().chain(r.aliases.iter()))
    {
        if seen.insert(normalize_name(candidate)) {
            aliases.push(candidate.clone());
        }
    }
    aliases.sort();

    let mut designations: Vec<SourceDesignation> = Vec::new();
    for record in group {
        let designation = SourceDesignation {
            source: record.source,
            source_id: record.source_id.clone(),
            designation_date: record.designation_date,
            status: record.status.unwrap_or(DesignationStatus::Designated),
        };
        if !designations.contains(&designation) {
            designations.push(designation);
        }
    }
    let status = resolve_status(&designations);

    let programs: BTreeSet<String> = group.iter().flat_map(|r| r.programs.iter().cloned()).collect();
    let is_exchange = group.iter().any(|r| r.is_exchange);
    let entity_type = if is_exchange {
        "exchange".to_string()
    } else {
        group
            .iter()
            .find_map(|r| r.entity_type.clone())
            .unwrap_or_else(|| "entity".to_string())
    };
    let volume_estimate_usd = group
        .iter()
        .filter_map(|r| r.volume_estimate_usd)
        .max_by(|a, b| a.total_cmp(b));

    SanctionedEntity {
        id: entity_id(&addresses, group),
        name,
        aliases,
        entity_type,
        designations,
        status,
        addresses,
        programs: programs.into_iter().collect(),
        country: group.iter().find_map(|r| r.country.clone()),
        is_exchange,
        exchange_name: group.iter().find_map(|r| r.exchange_name.clone()),
        volume_estimate_usd,
    }
}

/// Deterministic identity: same merge key → same id across runs
fn entity_id(addresses: &[CryptoAddress], group: &[&RawRecord]) -> String {
    let key = match addresses.first() {
        Some(a) => format!("addr:{}", a.address),
        None => {
            let first = group[0];
            match &first.source_id {
                Some(id) => format!("ref:{}:{}", first.source.code(), id),
                None => resubmission_key(first).unwrap_or_else(|| "empty".to_string()),
            }
        }
    };
    Uuid::new_v5(&Uuid::NAMESPACE_OID, key.as_bytes()).to_string()
}

/// Lowercase, punctuation-free, single-spaced
pub fn normalize_name(name: &str) -> String {
    name.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Name similarity in 0.0 - 1.0
///
/// - identical after normalization → 1.0
/// - one contained in the other → 0.85
/// - otherwise Jaccard overlap of significant tokens (>= min_token_len, not numeric)
pub fn name_similarity(a: &str, b: &str, min_token_len: usize) -> f64 {
    let (na, nb) = (normalize_name(a), normalize_name(b));
    if na.is_empty() || nb.is_empty() {
        return 0.0;
    }
    if na == nb {
        return 1.0;
    }
    if na.contains(&nb) || nb.contains(&na) {
        return 0.85;
    }

    let tokens = |s: &str| -> BTreeSet<String> {
        s.split(' ')
            .filter(|w| w.len() >= min_token_len && !w.chars().all(|c| c.is_numeric()))
            .map(|w| w.to_string())
            .collect()
    };
    let (ta, tb) = (tokens(&na), tokens(&nb));
    let union = ta.union(&tb).count();
    if union == 0 {
        return 0.0;
    }
    ta.intersection(&tb).count() as f64 / union as f64
}

/// Convenience: does any entity in the set own this address?
pub fn owner_of<'a>(entities: &'a [SanctionedEntity], address: &str) -> Option<&'a SanctionedEntity> {
    let key = normalize_address(address);
    entities
        .iter()
        .find(|e| e.addresses.iter().any(|a| a.address == key))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::collections::HashSet;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn record(source: SanctionsSource, name: &str, addresses: &[&str]) -> RawRecord {
        let mut r = RawRecord::new(source).with_name(name);
        for a in addresses {
            r = r.with_address(Chain::Ethereum, a);
        }
        r
    }

    fn assert_unique_addresses(report: &AggregationReport) {
        let mut seen = HashSet::new();
        for entity in &report.entities {
            for address in &entity.addresses {
                assert!(seen.insert(address.address.clone()), "address {} owned twice", address.address);
            }
        }
    }

    #[test]
    fn test_shared_address_merges_across_sources() {
        let records = vec![
            record(SanctionsSource::Ofac, "Garantex Europe OU", &["0xAAA1", "0xaaa2"]),
            record(SanctionsSource::Eu, "GARANTEX", &["0xaaa2", "0xaaa3"]).with_alias("Grinex"),
        ];

        let report = SanctionsAggregator::default().aggregate(&records);

        assert_eq!(report.entities.len(), 1);
        let entity = &report.entities[0];
        assert_eq!(entity.name, "Garantex Europe OU");
        assert_eq!(entity.addresses.len(), 3);
        assert_eq!(entity.sources(), vec![SanctionsSource::Ofac, SanctionsSource::Eu]);
        assert!(entity.aliases.contains(&"GARANTEX".to_string()));
        assert!(entity.aliases.contains(&"Grinex".to_string()));
    }

    #[test]
    fn test_transitive_address_merge() {
        let records = vec![
            record(SanctionsSource::Ofac, "A", &["0x01"]),
            record(SanctionsSource::Eu, "B", &["0x02"]),
            record(SanctionsSource::Uk, "C", &["0x01", "0x02"]),
        ];

        let report = SanctionsAggregator::default().aggregate(&records);
        assert_eq!(report.entities.len(), 1);
        assert_eq!(report.entities[0].addresses.len(), 2);
    }

    #[test]
    fn test_name_similarity_only_cross_references() {
        let records = vec![
            record(SanctionsSource::Ofac, "Cryptex", &["0xc1"]),
            record(SanctionsSource::Uk, "CRYPTEX", &[]),
        ];

        let report = SanctionsAggregator::default().aggregate(&records);

        assert_eq!(report.entities.len(), 2);
        assert_eq!(report.cross_references.len(), 1);
        assert_eq!(report.cross_references[0].confidence, 1.0);
    }

    #[test]
    fn test_unrelated_names_not_cross_referenced() {
        let records = vec![
            record(SanctionsSource::Ofac, "Suex OTC", &["0x51"]),
            record(SanctionsSource::Ofac, "Chatex", &["0x52"]),
        ];

        let report = SanctionsAggregator::default().aggregate(&records);
        assert_eq!(report.entities.len(), 2);
        assert!(report.cross_references.is_empty());
    }

    #[test]
    fn test_aggregating_same_record_twice_is_idempotent() {
        let r = record(SanctionsSource::Ofac, "Garantex", &["0xg1", "0xg2"]).with_source_id("123");
        let name_only = RawRecord::new(SanctionsSource::Uk).with_name("Ivan Petrov");

        let once = SanctionsAggregator::default().aggregate(&[r.clone(), name_only.clone()]);
        let twice = SanctionsAggregator::default()
            .aggregate(&[r.clone(), name_only.clone(), r, name_only]);

        assert_eq!(once.entities, twice.entities);
        assert_unique_addresses(&twice);
        assert_eq!(twice.entities.len(), 2);
    }

    #[test]
    fn test_same_name_different_people_kept_apart() {
        let first = RawRecord::new(SanctionsSource::Uk)
            .with_name("Ivan Petrov")
            .with_alias("Ivan Petrovich Petrov")
            .with_date(date(2022, 3, 15));
        let second = RawRecord::new(SanctionsSource::Uk)
            .with_name("Ivan Petrov")
            .with_alias("Ivan Sergeyevich Petrov")
            .with_date(date(2023, 5, 19));

        let report = SanctionsAggregator::default().aggregate(&[first.clone(), second]);

        assert_eq!(report.entities.len(), 2);
        assert_ne!(report.entities[0].id, report.entities[1].id);
        assert!(report.entities.iter().all(|e| e.aliases.len() == 1));
        assert_eq!(report.cross_references.len(), 1);
        assert_eq!(report.cross_references[0].confidence, 1.0);

        // An identical re-submission is still one entity
        let resubmitted = SanctionsAggregator::default().aggregate(&[first.clone(), first]);
        assert_eq!(resubmitted.entities.len(), 1);
    }

    #[test]
    fn test_most_recent_status_wins() {
        let records = vec![
            record(SanctionsSource::Ofac, "X", &["0xx1"])
                .with_date(date(2022, 4, 5))
                .with_status(DesignationStatus::Designated),
            record(SanctionsSource::Eu, "X", &["0xx1"])
                .with_date(date(2024, 1, 10))
                .with_status(DesignationStatus::Delisted),
        ];

        let report = SanctionsAggregator::default().aggregate(&records);
        assert_eq!(report.entities[0].status, DesignationStatus::Delisted);
    }

    #[test]
    fn test_status_tie_keeps_designated() {
        let records = vec![
            record(SanctionsSource::Ofac, "X", &["0xx1"])
                .with_date(date(2024, 1, 10))
                .with_status(DesignationStatus::Delisted),
            record(SanctionsSource::Uk, "X", &["0xx1"])
                .with_date(date(2024, 1, 10))
                .with_status(DesignationStatus::Designated),
        ];

        let report = SanctionsAggregator::default().aggregate(&records);
        assert_eq!(report.entities[0].status, DesignationStatus::Designated);
    }

    #[test]
    fn test_dated_record_beats_undated() {
        let designations = vec![
            SourceDesignation {
                source: SanctionsSource::Uk,
                source_id: None,
                designation_date: None,
                status: DesignationStatus::Designated,
            },
            SourceDesignation {
                source: SanctionsSource::Eu,
                source_id: None,
                designation_date: Some(date(2023, 6, 1)),
                status: DesignationStatus::Delisted,
            },
        ];
        assert_eq!(resolve_status(&designations), DesignationStatus::Delisted);
        assert_eq!(resolve_status(&[]), DesignationStatus::Designated);
    }

    #[test]
    fn test_malformed_record_skipped_not_fatal() {
        let records = vec![
            RawRecord::new(SanctionsSource::Eu),
            record(SanctionsSource::Ofac, "Suex", &["0x51"]),
        ];

        let report = SanctionsAggregator::default().aggregate(&records);
        assert_eq!(report.records_in, 2);
        assert_eq!(report.records_skipped, 1);
        assert_eq!(report.entities.len(), 1);
        assert!(report.quality.iter().any(|q| q.has_critical_issues()));
    }

    #[test]
    fn test_entity_ids_are_deterministic() {
        let records = vec![
            record(SanctionsSource::Ofac, "A", &["0x01"]),
            record(SanctionsSource::Eu, "B", &["0x02"]),
        ];
        let mut reversed = records.clone();
        reversed.reverse();

        let a = SanctionsAggregator::default().aggregate(&records);
        let b = SanctionsAggregator::default().aggregate(&reversed);
        assert_eq!(a.entities, b.entities);
    }

    #[test]
    fn test_name_similarity_scores() {
        assert_eq!(name_similarity("Garantex", "GARANTEX", 4), 1.0);
        assert_eq!(name_similarity("Garantex", "Garantex Europe OU", 4), 0.85);
        assert_eq!(name_similarity("Suex", "Chatex", 4), 0.0);
        assert_eq!(name_similarity("", "Chatex", 4), 0.0);
    }

    #[tokio::test]
    async fn test_collect_tolerates_failing_feed() {
        struct BrokenFeed;

        #[async_trait]
        impl SanctionsFeed for BrokenFeed {
            fn source(&self) -> SanctionsSource {
                SanctionsSource::Eu
            }

            async fn fetch(&self) -> Result<Vec<RawRecord>> {
                Err(anyhow::anyhow!("connection reset"))
            }
        }

        let feeds: Vec<Arc<dyn SanctionsFeed>> = vec![
            Arc::new(StaticFeed::new(
                SanctionsSource::Ofac,
                vec![record(SanctionsSource::Ofac, "Garantex", &["0xg1"])],
            )),
            Arc::new(BrokenFeed),
        ];

        let report = SanctionsAggregator::default().collect(&feeds).await;
        assert_eq!(report.entities.len(), 1);
        assert!(owner_of(&report.entities, "0xG1").is_some());
    }
}
