// 🧱 Core Data Model
// Canonical shapes shared by the aggregator, the index and the tracer.
//
// Addresses are always stored in their normalized form (see normalize_address),
// so every lookup and every dedup key compares like with like.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Longest address we accept (matches the widest explorer column we store)
pub const MAX_ADDRESS_LEN: usize = 128;

// ============================================================================
// CHAIN
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Chain {
    Bitcoin,
    Ethereum,
    Tron,
    UsdtErc20,
    UsdtTrc20,
    /// Rouble-backed stablecoin
    A7a5,
    Unknown,
}

impl Chain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Chain::Bitcoin => "bitcoin",
            Chain::Ethereum => "ethereum",
            Chain::Tron => "tron",
            Chain::UsdtErc20 => "usdt_erc20",
            Chain::UsdtTrc20 => "usdt_trc20",
            Chain::A7a5 => "a7a5",
            Chain::Unknown => "unknown",
        }
    }

    /// Parse the currency code embedded in a sanctions-list id type
    ///
    /// Example: "Digital Currency Address - XBT" → Chain::Bitcoin
    pub fn from_currency_code(id_type: &str) -> Chain {
        if id_type.contains("XBT") || id_type.contains("BTC") {
            Chain::Bitcoin
        } else if id_type.contains("ETH") {
            Chain::Ethereum
        } else if id_type.contains("TRX") {
            Chain::Tron
        } else if id_type.contains("USDT") {
            Chain::UsdtTrc20
        } else {
            Chain::Unknown
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Chain {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "bitcoin" | "btc" | "xbt" => Ok(Chain::Bitcoin),
            "ethereum" | "eth" => Ok(Chain::Ethereum),
            "tron" | "trx" => Ok(Chain::Tron),
            "usdt_erc20" => Ok(Chain::UsdtErc20),
            "usdt_trc20" | "usdt" => Ok(Chain::UsdtTrc20),
            "a7a5" => Ok(Chain::A7a5),
            "unknown" => Ok(Chain::Unknown),
            other => Err(format!("unknown chain: {}", other)),
        }
    }
}

// ============================================================================
// SOURCES & STATUS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SanctionsSource {
    Ofac,
    Eu,
    Uk,
    Bis,
}

impl SanctionsSource {
    pub fn name(&self) -> &'static str {
        match self {
            SanctionsSource::Ofac => "OFAC SDN",
            SanctionsSource::Eu => "EU Consolidated",
            SanctionsSource::Uk => "UK OFSI",
            SanctionsSource::Bis => "BIS Entity List",
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            SanctionsSource::Ofac => "ofac",
            SanctionsSource::Eu => "eu",
            SanctionsSource::Uk => "uk",
            SanctionsSource::Bis => "bis",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DesignationStatus {
    Designated,
    Delisted,
}

impl DesignationStatus {
    /// Higher = more restrictive (designated beats delisted on ties)
    pub fn restrictiveness(&self) -> u8 {
        match self {
            DesignationStatus::Designated => 1,
            DesignationStatus::Delisted => 0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DesignationStatus::Designated => "designated",
            DesignationStatus::Delisted => "delisted",
        }
    }
}

/// One source's opinion about an entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDesignation {
    pub source: SanctionsSource,

    /// Source-specific reference (OFAC uid, EU reference, UK group id)
    pub source_id: Option<String>,

    pub designation_date: Option<NaiveDate>,

    pub status: DesignationStatus,
}

// ============================================================================
// ENTITIES & ADDRESSES
// ============================================================================

/// Address attached to an entity (value only, no ownership back-link)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CryptoAddress {
    pub chain: Chain,
    pub address: String,
}

impl CryptoAddress {
    pub fn new(chain: Chain, address: &str) -> Self {
        CryptoAddress {
            chain,
            address: normalize_address(address),
        }
    }
}

/// Canonical sanctioned actor, merged across every contributing source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SanctionedEntity {
    /// Stable identity derived from the merge key (deterministic)
    pub id: String,

    pub name: String,

    /// Union of alias sets across sources (sorted, never contains `name`)
    pub aliases: Vec<String>,

    /// "individual", "entity", "exchange", ...
    pub entity_type: String,

    pub designations: Vec<SourceDesignation>,

    /// Resolved status after conflict resolution
    pub status: DesignationStatus,

    /// Union of address sets across sources (sorted, unique)
    pub addresses: Vec<CryptoAddress>,

    pub programs: Vec<String>,
    pub country: Option<String>,

    pub is_exchange: bool,
    pub exchange_name: Option<String>,

    /// Aggregate processed-volume estimate (USD)
    pub volume_estimate_usd: Option<f64>,
}

impl SanctionedEntity {
    pub fn is_designated(&self) -> bool {
        self.status == DesignationStatus::Designated
    }

    pub fn has_address(&self, address: &str) -> bool {
        let key = normalize_address(address);
        self.addresses.iter().any(|a| a.address == key)
    }

    /// Get all names (canonical + aliases)
    pub fn all_names(&self) -> Vec<String> {
        let mut names = vec![self.name.clone()];
        names.extend(self.aliases.iter().cloned());
        names
    }

    /// Distinct contributing sources, sorted
    pub fn sources(&self) -> Vec<SanctionsSource> {
        let mut sources: Vec<SanctionsSource> =
            self.designations.iter().map(|d| d.source).collect();
        sources.sort();
        sources.dedup();
        sources
    }

    pub fn latest_designation_date(&self) -> Option<NaiveDate> {
        self.designations.iter().filter_map(|d| d.designation_date).max()
    }
}

/// Index-owned mapping entry: address → owning entity (by id)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesignatedAddress {
    pub chain: Chain,
    pub address: String,
    pub entity_id: String,
}

// ============================================================================
// TRANSACTIONS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CounterpartyTag {
    Mixer,
    Exchange,
    P2pVenue,
    Bridge,
}

/// Observed on-chain transfer (immutable once observed)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    #[serde(default)]
    pub tx_hash: Option<String>,

    pub source: String,
    pub destination: String,
    pub amount: f64,
    pub timestamp: DateTime<Utc>,
    pub chain: Chain,

    /// Set when a bridge/swap record links this transfer to another chain
    #[serde(default)]
    pub destination_chain: Option<Chain>,

    #[serde(default)]
    pub counterparty_tag: Option<CounterpartyTag>,
}

/// Dedup identity: (source, destination, timestamp, amount)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TxKey {
    pub source: String,
    pub destination: String,
    pub timestamp: i64,
    pub amount_bits: u64,
}

impl Transaction {
    pub fn new(source: &str, destination: &str, amount: f64, timestamp: DateTime<Utc>, chain: Chain) -> Self {
        Transaction {
            tx_hash: None,
            source: normalize_address(source),
            destination: normalize_address(destination),
            amount,
            timestamp,
            chain,
            destination_chain: None,
            counterparty_tag: None,
        }
    }

    /// Builder pattern: add tx hash
    pub fn with_hash(mut self, hash: &str) -> Self {
        self.tx_hash = Some(hash.to_string());
        self
    }

    /// Builder pattern: mark as bridged to another chain
    pub fn with_destination_chain(mut self, chain: Chain) -> Self {
        self.destination_chain = Some(chain);
        self
    }

    /// Builder pattern: attach a counterparty tag
    pub fn with_tag(mut self, tag: CounterpartyTag) -> Self {
        self.counterparty_tag = Some(tag);
        self
    }

    /// Copy with both endpoints normalized (accessors may return raw casing)
    pub fn normalized(&self) -> Transaction {
        let mut tx = self.clone();
        tx.source = normalize_address(&tx.source);
        tx.destination = normalize_address(&tx.destination);
        tx
    }

    pub fn key(&self) -> TxKey {
        TxKey {
            source: self.source.clone(),
            destination: self.destination.clone(),
            timestamp: self.timestamp.timestamp_millis(),
            // -0.0 and 0.0 are the same amount
            amount_bits: (self.amount + 0.0).to_bits(),
        }
    }

    pub fn is_cross_chain(&self) -> bool {
        self.destination_chain.map_or(false, |c| c != self.chain)
    }

    /// The other endpoint, if `address` is one of the endpoints
    pub fn counterparty_of(&self, address: &str) -> Option<&str> {
        if self.source == address {
            Some(&self.destination)
        } else if self.destination == address {
            Some(&self.source)
        } else {
            None
        }
    }
}

// ============================================================================
// ADDRESS HELPERS
// ============================================================================

/// Canonical form for an address string
///
/// - surrounding whitespace is dropped
/// - hex (`0x…`) and bech32 (`bc1…`, `tb1…`, `ltc1…`) are case-insensitive → lower-cased
/// - anything else (base58: Tron, legacy BTC) is case-sensitive → kept as is
pub fn normalize_address(address: &str) -> String {
    let trimmed = address.trim();
    let lower = trimmed.to_lowercase();

    if lower.starts_with("0x")
        || lower.starts_with("bc1")
        || lower.starts_with("tb1")
        || lower.starts_with("ltc1")
    {
        lower
    } else {
        trimmed.to_string()
    }
}

/// Reject addresses that cannot be a seed for a trace
pub fn validate_address(address: &str) -> Result<(), String> {
    let trimmed = address.trim();

    if trimmed.is_empty() {
        return Err("address is empty".to_string());
    }

    if trimmed.len() > MAX_ADDRESS_LEN {
        return Err(format!(
            "address is {} chars, limit is {}",
            trimmed.len(),
            MAX_ADDRESS_LEN
        ));
    }

    if let Some(bad) = trimmed
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | ':' | '.')))
    {
        return Err(format!("address contains invalid character {:?}", bad));
    }

    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================
