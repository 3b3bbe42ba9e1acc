// ⚙️ Configuration - Settings as Data
// Every field has a default; a JSON file and TRACER_* env vars can override.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

// ============================================================================
// TRACER
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TracerConfig {
    /// Hop limit used when a request does not give one
    pub default_max_hops: u32,

    /// Requests above this are rejected
    pub max_hops_limit: u32,

    /// Per-address budget for one Graph Accessor call
    pub accessor_timeout_ms: u64,

    /// Concurrent accessor calls within one hop level
    pub fetch_concurrency: usize,

    /// Fan-out cap per expanded address (explorer rate limits)
    pub max_transactions_per_address: usize,

    /// Treat the seed as the origin of the designated neighbourhood
    pub anchor_seed: bool,

    /// Distance from a designated address at which edges become layering
    pub layering_min_hops: u32,

    /// Beyond this distance an otherwise unclassified edge is unrelated
    pub layering_max_hops: u32,
}

impl Default for TracerConfig {
    fn default() -> Self {
        TracerConfig {
            default_max_hops: 3,
            max_hops_limit: 6,
            accessor_timeout_ms: 10_000,
            fetch_concurrency: 8,
            max_transactions_per_address: 20,
            anchor_seed: true,
            layering_min_hops: 2,
            layering_max_hops: 6,
        }
    }
}

// ============================================================================
// SCORING
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternWeights {
    pub mixing: f64,
    pub chain_hopping: f64,
    pub layering: f64,
    pub p2p: f64,
    pub direct: f64,
}

impl Default for PatternWeights {
    fn default() -> Self {
        PatternWeights {
            mixing: 1.0,
            chain_hopping: 0.8,
            layering: 0.6,
            p2p: 0.55,
            direct: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub weights: PatternWeights,

    /// Volume factor for a negligible amount (lower bound of the factor)
    pub volume_floor: f64,

    /// How fast the volume factor approaches 1.0
    pub volume_saturation: f64,

    /// Proximity multiplier applied per hop away from a designated address
    pub hop_decay: f64,

    pub critical_threshold: f64,
    pub high_threshold: f64,
    pub medium_threshold: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        ScoringConfig {
            weights: PatternWeights::default(),
            volume_floor: 0.5,
            volume_saturation: 3.0,
            hop_decay: 0.5,
            critical_threshold: 80.0,
            high_threshold: 60.0,
            medium_threshold: 40.0,
        }
    }
}

// ============================================================================
// AGGREGATOR
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnownExchange {
    pub name: String,
    pub aliases: Vec<String>,
    pub volume_usd: Option<f64>,
}

impl KnownExchange {
    fn new(name: &str, aliases: &[&str], volume_usd: Option<f64>) -> Self {
        KnownExchange {
            name: name.to_string(),
            aliases: aliases.iter().map(|a| a.to_string()).collect(),
            volume_usd,
        }
    }

    /// Case-insensitive containment on the name or any alias
    pub fn matches(&self, name: &str) -> bool {
        let lower = name.to_lowercase();
        lower.contains(&self.name) || self.aliases.iter().any(|a| lower.contains(a.as_str()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    /// Minimum name similarity for a low-confidence cross-reference
    pub name_match_threshold: f64,

    /// Shorter name tokens are ignored when comparing names
    pub min_token_len: usize,

    /// Program codes that make an OFAC entry Russia-linked
    pub russia_programs: Vec<String>,

    pub known_exchanges: Vec<KnownExchange>,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        AggregatorConfig {
            name_match_threshold: 0.7,
            min_token_len: 4,
            russia_programs: [
                "RUSSIA",
                "RUSSIA-EO14024",
                "RUSSIA-EO14039",
                "UKRAINE-EO13661",
                "RUSSIA-UKRAINE",
                "CYBER2",
            ]
            .iter()
            .map(|p| p.to_string())
            .collect(),
            known_exchanges: vec![
                KnownExchange::new("garantex", &["grinex"], Some(6_000_000_000.0)),
                KnownExchange::new("cryptex", &[], Some(5_880_000_000.0)),
                KnownExchange::new("suex", &[], Some(370_000_000.0)),
                KnownExchange::new("chatex", &[], Some(200_000_000.0)),
                KnownExchange::new("bitpapa", &[], None),
            ],
        }
    }
}

// ============================================================================
// SETTINGS
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub tracer: TracerConfig,
    pub scoring: ScoringConfig,
    pub aggregator: AggregatorConfig,
}

impl Settings {
    /// Load settings from a JSON file (missing fields keep their defaults)
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read settings file: {:?}", path.as_ref()))?;

        let settings: Settings =
            serde_json::from_str(&content).context("Failed to parse settings JSON")?;

        settings.validate()?;
        Ok(settings)
    }

    /// Defaults overridden by TRACER_* environment variables
    pub fn from_env() -> Result<Self> {
        let mut settings = Settings::default();
        settings.apply_env()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Override individual fields from the environment
    pub fn apply_env(&mut self) -> Result<()> {
        if let Some(v) = env_parse("TRACER_MAX_HOPS")? {
            self.tracer.default_max_hops = v;
        }
        if let Some(v) = env_parse("TRACER_MAX_HOPS_LIMIT")? {
            self.tracer.max_hops_limit = v;
        }
        if let Some(v) = env_parse("TRACER_ACCESSOR_TIMEOUT_MS")? {
            self.tracer.accessor_timeout_ms = v;
        }
        if let Some(v) = env_parse("TRACER_FETCH_CONCURRENCY")? {
            self.tracer.fetch_concurrency = v;
        }
        if let Some(v) = env_parse("TRACER_MAX_TX_PER_ADDRESS")? {
            self.tracer.max_transactions_per_address = v;
        }
        if let Some(v) = env_parse("TRACER_ANCHOR_SEED")? {
            self.tracer.anchor_seed = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let t = &self.tracer;
        if t.accessor_timeout_ms == 0 {
            bail!("tracer.accessor_timeout_ms must be positive");
        }
        if t.fetch_concurrency == 0 {
            bail!("tracer.fetch_concurrency must be positive");
        }
        if t.default_max_hops > t.max_hops_limit {
            bail!(
                "tracer.default_max_hops ({}) exceeds tracer.max_hops_limit ({})",
                t.default_max_hops,
                t.max_hops_limit
            );
        }
        if t.layering_min_hops > t.layering_max_hops {
            bail!("tracer.layering_min_hops exceeds tracer.layering_max_hops");
        }

        let s = &self.scoring;
        let w = &s.weights;
        for (name, value) in [
            ("mixing", w.mixing),
            ("chain_hopping", w.chain_hopping),
            ("layering", w.layering),
            ("p2p", w.p2p),
            ("direct", w.direct),
        ] {
            if !(0.0..=1.0).contains(&value) {
                bail!("scoring.weights.{} must be within 0..=1, got {}", name, value);
            }
        }
        if [w.chain_hopping, w.layering, w.p2p, w.direct]
            .iter()
            .any(|other| *other >= w.mixing)
        {
            bail!("scoring.weights.mixing must be strictly the highest weight");
        }
        if !(0.0..=1.0).contains(&s.volume_floor) {
            bail!("scoring.volume_floor must be within 0..=1");
        }
        if s.volume_saturation <= 0.0 {
            bail!("scoring.volume_saturation must be positive");
        }
        if !(0.0..=1.0).contains(&s.hop_decay) {
            bail!("scoring.hop_decay must be within 0..=1");
        }
        if !(s.medium_threshold <= s.high_threshold && s.high_threshold <= s.critical_threshold) {
            bail!("scoring tier thresholds must be ascending");
        }

        let a = &self.aggregator;
        if !(0.0..=1.0).contains(&a.name_match_threshold) {
            bail!("aggregator.name_match_threshold must be within 0..=1");
        }

        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| anyhow::anyhow!("invalid value for {}: {:?}", key, raw)),
        Err(_) => Ok(None),
    }
}

// ============================================================================
// TESTS
// ============================================================================
