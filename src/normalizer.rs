// 🏗️ Entity Normalizer - One canonical record shape for every source
// OFAC, EU and UK publish differently shaped lists; each gets a normalizer
// that emits RawRecord, and nothing downstream branches on the source shape.

use crate::config::{AggregatorConfig, KnownExchange};
use crate::models::{Chain, CryptoAddress, DesignationStatus, SanctionsSource};
use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ============================================================================
// CANONICAL RAW RECORD
// ============================================================================

/// RawRecord - Output of every normalizer, input of the aggregator
///
/// Every field except `source` may be missing; the aggregator decides what
/// is usable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub source: SanctionsSource,

    #[serde(default)]
    pub source_id: Option<String>,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub aliases: Vec<String>,

    #[serde(default)]
    pub addresses: Vec<CryptoAddress>,

    #[serde(default)]
    pub designation_date: Option<NaiveDate>,

    #[serde(default)]
    pub status: Option<DesignationStatus>,

    #[serde(default)]
    pub entity_type: Option<String>,

    #[serde(default)]
    pub programs: Vec<String>,

    #[serde(default)]
    pub country: Option<String>,

    #[serde(default)]
    pub is_exchange: bool,

    #[serde(default)]
    pub exchange_name: Option<String>,

    #[serde(default)]
    pub volume_estimate_usd: Option<f64>,
}

impl RawRecord {
    pub fn new(source: SanctionsSource) -> Self {
        RawRecord {
            source,
            source_id: None,
            name: None,
            aliases: Vec::new(),
            addresses: Vec::new(),
            designation_date: None,
            status: None,
            entity_type: None,
            programs: Vec::new(),
            country: None,
            is_exchange: false,
            exchange_name: None,
            volume_estimate_usd: None,
        }
    }

    /// Builder pattern: add name (blank names are ignored)
    pub fn with_name(mut self, name: &str) -> Self {
        let name = name.trim();
        if !name.is_empty() {
            self.name = Some(name.to_string());
        }
        self
    }

    pub fn with_source_id(mut self, id: &str) -> Self {
        let id = id.trim();
        if !id.is_empty() {
            self.source_id = Some(id.to_string());
        }
        self
    }

    pub fn with_alias(mut self, alias: &str) -> Self {
        let alias = alias.trim();
        if !alias.is_empty() {
            self.aliases.push(alias.to_string());
        }
        self
    }

    /// Builder pattern: add address (normalized; blank addresses are ignored)
    pub fn with_address(mut self, chain: Chain, address: &str) -> Self {
        if !address.trim().is_empty() {
            self.addresses.push(CryptoAddress::new(chain, address));
        }
        self
    }

    pub fn with_date(mut self, date: NaiveDate) -> Self {
        self.designation_date = Some(date);
        self
    }

    pub fn with_status(mut self, status: DesignationStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_entity_type(mut self, entity_type: &str) -> Self {
        let entity_type = entity_type.trim();
        if !entity_type.is_empty() {
            self.entity_type = Some(entity_type.to_lowercase());
        }
        self
    }

    pub fn with_program(mut self, program: &str) -> Self {
        self.programs.push(program.to_string());
        self
    }

    pub fn with_country(mut self, country: &str) -> Self {
        self.country = Some(country.to_string());
        self
    }

    pub fn with_volume(mut self, volume_usd: f64) -> Self {
        self.volume_estimate_usd = Some(volume_usd);
        self
    }

    /// Human-readable label for logs and quality reports
    pub fn label(&self) -> String {
        let who = self
            .name
            .clone()
            .or_else(|| self.addresses.first().map(|a| a.address.clone()))
            .unwrap_or_else(|| "<unnamed>".to_string());
        match &self.source_id {
            Some(id) => format!("{}:{} ({})", self.source.code(), id, who),
            None => format!("{} ({})", self.source.code(), who),
        }
    }
}

// ============================================================================
// NORMALIZER TRAIT
// ============================================================================

/// SourceNormalizer - turns one source's native entry into a RawRecord
///
/// Adding a source = one new implementation; the aggregator is untouched.
pub trait SourceNormalizer: Send + Sync {
    /// Native entry shape for this source
    type Entry;

    fn source(&self) -> SanctionsSource;

    /// `None` when the entry is out of scope (not Russia-linked)
    fn normalize(&self, entry: &Self::Entry) -> Option<RawRecord>;

    fn normalize_all(&self, entries: &[Self::Entry]) -> Vec<RawRecord> {
        entries.iter().filter_map(|e| self.normalize(e)).collect()
    }
}

/// Flag known exchanges and attach their volume estimate
pub fn enrich_known_exchange(mut record: RawRecord, exchanges: &[KnownExchange]) -> RawRecord {
    let Some(name) = record.name.clone() else {
        return record;
    };

    let names: Vec<&str> = std::iter::once(name.as_str())
        .chain(record.aliases.iter().map(|a| a.as_str()))
        .collect();

    if let Some(exchange) = exchanges
        .iter()
        .find(|ex| names.iter().any(|n| ex.matches(n)))
    {
        record.is_exchange = true;
        record.exchange_name = Some(exchange.name.clone());
        record.entity_type = Some("exchange".to_string());
        if record.volume_estimate_usd.is_none() {
            record.volume_estimate_usd = exchange.volume_usd;
        }
    }

    record
}

/// Try each format in order
fn parse_date(raw: Option<&str>, formats: &[&str]) -> Option<NaiveDate> {
    let raw = raw?.trim();
    if raw.is_empty() {
        return None;
    }
    formats
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
}

// ============================================================================
// OFAC
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct OfacId {
    pub id_type: String,
    pub id_number: String,
}

/// One SDN list entry
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct OfacEntry {
    pub uid: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub sdn_type: Option<String>,
    pub programs: Vec<String>,
    pub aka_list: Vec<String>,
    pub ids: Vec<OfacId>,
    /// MM/DD/YYYY
    pub publish_date: Option<String>,
    pub remarks: Option<String>,
}

pub struct OfacNormalizer {
    russia_programs: Vec<String>,
    known_exchanges: Vec<KnownExchange>,
}

impl OfacNormalizer {
    pub fn new(config: &AggregatorConfig) -> Self {
        OfacNormalizer {
            russia_programs: config.russia_programs.clone(),
            known_exchanges: config.known_exchanges.clone(),
        }
    }

    fn russia_programs(&self, programs: &[String]) -> Vec<String> {
        programs
            .iter()
            .filter(|p| self.russia_programs.iter().any(|rp| p.contains(rp.as_str())))
            .cloned()
            .collect()
    }
}

impl SourceNormalizer for OfacNormalizer {
    type Entry = OfacEntry;

    fn source(&self) -> SanctionsSource {
        SanctionsSource::Ofac
    }

    fn normalize(&self, entry: &OfacEntry) -> Option<RawRecord> {
        let programs = self.russia_programs(&entry.programs);
        if programs.is_empty() {
            return None;
        }

        let name = [entry.first_name.as_deref(), entry.last_name.as_deref()]
            .iter()
            .flatten()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        let mut record = RawRecord::new(SanctionsSource::Ofac)
            .with_name(&name)
            .with_status(DesignationStatus::Designated);

        if let Some(uid) = &entry.uid {
            record = record.with_source_id(uid);
        }
        if let Some(sdn_type) = &entry.sdn_type {
            record = record.with_entity_type(sdn_type);
        }
        if let Some(date) = parse_date(entry.publish_date.as_deref(), &["%m/%d/%Y", "%Y-%m-%d"]) {
            record = record.with_date(date);
        }
        for aka in &entry.aka_list {
            record = record.with_alias(aka);
        }
        for program in programs {
            record = record.with_program(&program);
        }

        // Only digital-currency ids carry addresses
        for id in entry.ids.iter().filter(|id| id.id_type.contains("Digital Currency")) {
            record = record.with_address(Chain::from_currency_code(&id.id_type), &id.id_number);
        }

        Some(enrich_known_exchange(record, &self.known_exchanges))
    }
}

// ============================================================================
// EU
// ============================================================================

/// One EU consolidated-list entry (already flattened from XML)
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct EuEntry {
    pub reference: Option<String>,
    pub whole_name: Option<String>,
    pub name_aliases: Vec<String>,
    /// Free text (regulation summary, remarks, addresses)
    pub text: String,
    pub addresses: Vec<CryptoAddress>,
    /// YYYY-MM-DD
    pub regulation_date: Option<String>,
    pub delisted: bool,
}

pub struct EuNormalizer {
    known_exchanges: Vec<KnownExchange>,
}

impl EuNormalizer {
    pub fn new(config: &AggregatorConfig) -> Self {
        EuNormalizer {
            known_exchanges: config.known_exchanges.clone(),
        }
    }
}

impl SourceNormalizer for EuNormalizer {
    type Entry = EuEntry;

    fn source(&self) -> SanctionsSource {
        SanctionsSource::Eu
    }

    fn normalize(&self, entry: &EuEntry) -> Option<RawRecord> {
        if !entry.text.to_lowercase().contains("russia") {
            return None;
        }

        let status = if entry.delisted {
            DesignationStatus::Delisted
        } else {
            DesignationStatus::Designated
        };

        let mut record = RawRecord::new(SanctionsSource::Eu)
            .with_status(status)
            .with_entity_type("entity")
            .with_country("Russia");

        // Entries without a whole name fall back to their first alias
        let mut aliases = entry.name_aliases.iter();
        match entry.whole_name.as_deref().filter(|n| !n.trim().is_empty()) {
            Some(name) => record = record.with_name(name),
            None => {
                if let Some(first) = aliases.next() {
                    record = record.with_name(first);
                }
            }
        }
        for alias in aliases {
            record = record.with_alias(alias);
        }

        if let Some(reference) = &entry.reference {
            record = record.with_source_id(reference);
        }
        if let Some(date) = parse_date(entry.regulation_date.as_deref(), &["%Y-%m-%d"]) {
            record = record.with_date(date);
        }
        for address in &entry.addresses {
            record = record.with_address(address.chain, &address.address);
        }

        Some(enrich_known_exchange(record, &self.known_exchanges))
    }
}

// ============================================================================
// UK (CSV)
// ============================================================================

/// One row of the UK consolidated list, keyed by column header
pub type UkRow = HashMap<String, String>;

pub struct UkNormalizer {
    known_exchanges: Vec<KnownExchange>,
}

impl UkNormalizer {
    pub fn new(config: &AggregatorConfig) -> Self {
        UkNormalizer {
            known_exchanges: config.known_exchanges.clone(),
        }
    }

    /// Parse the published CSV into header-keyed rows
    pub fn parse_csv(&self, content: &str) -> Result<Vec<UkRow>> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(content.as_bytes());

        let mut rows = Vec::new();
        for (line_num, result) in reader.deserialize::<UkRow>().enumerate() {
            let row = result.with_context(|| {
                format!("Failed to parse UK list CSV line {}", line_num + 2)
            })?;
            rows.push(row);
        }
        Ok(rows)
    }

    /// parse_csv + normalize_all
    pub fn normalize_csv(&self, content: &str) -> Result<Vec<RawRecord>> {
        let rows = self.parse_csv(content)?;
        Ok(self.normalize_all(&rows))
    }
}

fn column<'a>(row: &'a UkRow, key: &str) -> Option<&'a str> {
    row.get(key).map(|v| v.trim()).filter(|v| !v.is_empty())
}

impl SourceNormalizer for UkNormalizer {
    type Entry = UkRow;

    fn source(&self) -> SanctionsSource {
        SanctionsSource::Uk
    }

    fn normalize(&self, row: &UkRow) -> Option<RawRecord> {
        let country = column(row, "Country of Origin").unwrap_or("").to_lowercase();
        let regime = column(row, "Regime").unwrap_or("").to_lowercase();
        if !country.contains("russia") && !regime.contains("russia") {
            return None;
        }

        // "Name 6" holds the full entity name, "Name 1" the individual's name
        let name = column(row, "Name 6").or_else(|| column(row, "Name 1")).unwrap_or("");

        let mut record = RawRecord::new(SanctionsSource::Uk)
            .with_name(name)
            .with_status(DesignationStatus::Designated)
            .with_entity_type(column(row, "Group Type").unwrap_or("entity"))
            .with_country("Russia");

        if let Some(group_id) = column(row, "Group ID") {
            record = record.with_source_id(group_id);
        }
        if let Some(date) = parse_date(column(row, "Date Designated"), &["%d/%m/%Y", "%Y-%m-%d"]) {
            record = record.with_date(date);
        }
        if let Some(regime) = column(row, "Regime") {
            record = record.with_program(regime);
        }

        Some(enrich_known_exchange(record, &self.known_exchanges))
    }
}

// ============================================================================
// TESTS
// ============================================================================
