// 🏷️ Pattern Classifier - Evasion Rules as Data
// Exactly one EvasionPattern per edge. Rules are evaluated in priority order
// (higher first) and the first match wins.

use crate::config::{PatternWeights, TracerConfig};
use crate::error::TraceError;
use crate::models::{CounterpartyTag, Transaction};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::Path;

// ============================================================================
// EVASION PATTERN
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EvasionPattern {
    Direct,
    Layering,
    Mixing,
    P2p,
    ChainHopping,
}

impl EvasionPattern {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvasionPattern::Direct => "direct",
            EvasionPattern::Layering => "layering",
            EvasionPattern::Mixing => "mixing",
            EvasionPattern::P2p => "p2p",
            EvasionPattern::ChainHopping => "chain-hopping",
        }
    }

    /// Base severity weight (0..=1) used by the risk scorer
    pub fn base_severity(&self, weights: &PatternWeights) -> f64 {
        match self {
            EvasionPattern::Mixing => weights.mixing,
            EvasionPattern::ChainHopping => weights.chain_hopping,
            EvasionPattern::Layering => weights.layering,
            EvasionPattern::P2p => weights.p2p,
            EvasionPattern::Direct => weights.direct,
        }
    }

    /// Patterns surfaced as high-risk edges in a trace result
    pub fn is_high_risk(&self) -> bool {
        matches!(self, EvasionPattern::Mixing | EvasionPattern::Layering)
    }
}

impl fmt::Display for EvasionPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// CONTEXT
// ============================================================================

/// What the tracer knows about an edge at the moment it is classified
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassificationContext {
    /// The far endpoint is in the designated set
    pub counterparty_designated: bool,

    /// Either endpoint is in the designated set
    pub endpoint_designated: bool,

    /// Tag lookup result for the far endpoint, plus the transaction's own tag
    pub counterparty_tags: BTreeSet<CounterpartyTag>,

    /// Source and destination sit on different chains (bridge/swap record)
    pub cross_chain: bool,

    /// Hops from the nearest designated address (or the anchored seed) to the
    /// far endpoint along the current path; None = no relation
    pub hops_from_designated: Option<u32>,
}

impl ClassificationContext {
    pub fn has_tag(&self, tag: CounterpartyTag) -> bool {
        self.counterparty_tags.contains(&tag)
    }
}

// ============================================================================
// RULE DEFINITION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum RuleCondition {
    /// Far endpoint carries this tag
    CounterpartyTagged(CounterpartyTag),

    /// Edge crosses a chain boundary, or the far endpoint is a bridge
    CrossChain,

    /// Either endpoint is itself designated
    EndpointDesignated,

    /// At least this many hops from the nearest designated address
    HopsAtLeast(u32),

    /// Matches every edge that reaches the classifier
    Always,
}

impl RuleCondition {
    pub fn matches(&self, ctx: &ClassificationContext) -> bool {
        match self {
            RuleCondition::CounterpartyTagged(tag) => ctx.has_tag(*tag),
            RuleCondition::CrossChain => ctx.cross_chain || ctx.has_tag(CounterpartyTag::Bridge),
            RuleCondition::EndpointDesignated => ctx.endpoint_designated,
            RuleCondition::HopsAtLeast(min) => ctx.hops_from_designated.map_or(false, |h| h >= *min),
            RuleCondition::Always => true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationRule {
    /// Rule ID for tracking
    pub id: String,

    pub condition: RuleCondition,

    pub pattern: EvasionPattern,

    /// Priority (higher = applied first)
    #[serde(default)]
    pub priority: i32,

    pub description: Option<String>,
}

impl ClassificationRule {
    pub fn new(id: &str, condition: RuleCondition, pattern: EvasionPattern, priority: i32) -> Self {
        ClassificationRule {
            id: id.to_string(),
            condition,
            pattern,
            priority,
            description: None,
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }
}

/// Outcome for a single edge
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub pattern: EvasionPattern,

    /// None when no rule matched and the ambiguity fallback was used
    pub rule_id: Option<String>,
}

impl Classification {
    pub fn is_fallback(&self) -> bool {
        self.rule_id.is_none()
    }
}

// ============================================================================
// PATTERN CLASSIFIER
// ============================================================================

pub struct PatternClassifier {
    rules: Vec<ClassificationRule>,

    /// Beyond this distance an edge has no relation to the designated set
    max_related_hops: u32,
}

impl PatternClassifier {
    /// Standard evasion rules, thresholds taken from the tracer config
    pub fn new(config: &TracerConfig) -> Self {
        let rules = vec![
            ClassificationRule::new(
                "mixer-counterparty",
                RuleCondition::CounterpartyTagged(CounterpartyTag::Mixer),
                EvasionPattern::Mixing,
                100,
            )
            .with_description("Counterparty is a known mixer or tumbler"),
            ClassificationRule::new(
                "cross-chain",
                RuleCondition::CrossChain,
                EvasionPattern::ChainHopping,
                90,
            )
            .with_description("Value moved across a bridge or swap"),
            ClassificationRule::new(
                "designated-endpoint",
                RuleCondition::EndpointDesignated,
                EvasionPattern::Direct,
                80,
            )
            .with_description("Edge touches a designated address"),
            ClassificationRule::new(
                "layered-path",
                RuleCondition::HopsAtLeast(config.layering_min_hops),
                EvasionPattern::Layering,
                70,
            )
            .with_description("Intermediate addresses between edge and designated address"),
            ClassificationRule::new(
                "p2p-venue",
                RuleCondition::CounterpartyTagged(CounterpartyTag::P2pVenue),
                EvasionPattern::P2p,
                60,
            )
            .with_description("Counterparty is a peer-to-peer venue"),
            ClassificationRule::new("neighbourhood", RuleCondition::Always, EvasionPattern::Direct, 0)
                .with_description("Edge inside the designated neighbourhood"),
        ];

        Self::from_rules(rules, config.layering_max_hops)
    }

    /// Create classifier from a list of rules
    pub fn from_rules(mut rules: Vec<ClassificationRule>, max_related_hops: u32) -> Self {
        // Stable: equal priorities keep their listed order
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));
        PatternClassifier {
            rules,
            max_related_hops,
        }
    }

    /// Load rules from JSON file
    pub fn from_file<P: AsRef<Path>>(path: P, max_related_hops: u32) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read classifier rules: {:?}", path.as_ref()))?;

        let rules: Vec<ClassificationRule> =
            serde_json::from_str(&content).context("Failed to parse classifier rules JSON")?;

        Ok(Self::from_rules(rules, max_related_hops))
    }

    /// Whether the edge relates to the designated set at all
    pub fn is_related(&self, ctx: &ClassificationContext) -> bool {
        ctx.endpoint_designated
            || ctx
                .hops_from_designated
                .map_or(false, |h| h <= self.max_related_hops)
    }

    /// Classify one edge; None means the edge is clean and not emitted
    pub fn classify(&self, tx: &Transaction, ctx: &ClassificationContext) -> Option<Classification> {
        if !self.is_related(ctx) {
            return None;
        }

        if let Some(rule) = self.rules.iter().find(|r| r.condition.matches(ctx)) {
            return Some(Classification {
                pattern: rule.pattern,
                rule_id: Some(rule.id.clone()),
            });
        }

        let err = TraceError::ClassificationAmbiguity {
            edge: format!("{} -> {}", tx.source, tx.destination),
        };
        tracing::warn!(target: "classifier", error = %err, "no rule matched, defaulting to direct");

        Some(Classification {
            pattern: EvasionPattern::Direct,
            rule_id: None,
        })
    }

    pub fn rules(&self) -> &[ClassificationRule] {
        &self.rules
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }
}

impl Default for PatternClassifier {
    fn default() -> Self {
        Self::new(&TracerConfig::default())
    }
}

// ============================================================================
// TESTS
// ============================================================================
