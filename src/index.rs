// 📇 Designated-Set Index - O(1) address → sanctioned entity
//
// The index is an immutable snapshot. Refreshing builds a new snapshot and
// swaps it in atomically; readers holding the old Arc keep a consistent view.

use crate::models::{normalize_address, DesignatedAddress, SanctionedEntity};
use arc_swap::ArcSwap;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;

// ============================================================================
// SNAPSHOT
// ============================================================================

#[derive(Debug, Default)]
pub struct DesignatedSetIndex {
    /// Designated entities only (delisted ones are "not designated")
    entities: Vec<SanctionedEntity>,

    /// Canonical address mapping, owned here; entities are referenced by id
    by_address: HashMap<String, DesignatedAddress>,

    /// entity id → position in `entities`
    by_entity: HashMap<String, usize>,

    /// SHA-256 over the sorted (address, entity id) pairs
    fingerprint: String,
}

impl DesignatedSetIndex {
    pub fn empty() -> Self {
        Self::build(&[])
    }

    pub fn build(entities: &[SanctionedEntity]) -> Self {
        let mut index = DesignatedSetIndex::default();

        for entity in entities.iter().filter(|e| e.is_designated()) {
            let pos = index.entities.len();
            index.by_entity.insert(entity.id.clone(), pos);

            for address in &entity.addresses {
                if let Some(existing) = index.by_address.get(&address.address) {
                    tracing::warn!(
                        target: "index",
                        address = %address.address,
                        kept = %existing.entity_id,
                        dropped = %entity.id,
                        "address owned by two entities, keeping the first"
                    );
                    continue;
                }
                index.by_address.insert(
                    address.address.clone(),
                    DesignatedAddress {
                        chain: address.chain,
                        address: address.address.clone(),
                        entity_id: entity.id.clone(),
                    },
                );
            }

            index.entities.push(entity.clone());
        }

        index.fingerprint = index.compute_fingerprint();
        index
    }

    fn compute_fingerprint(&self) -> String {
        let mut pairs: Vec<(&String, &String)> = self
            .by_address
            .values()
            .map(|d| (&d.address, &d.entity_id))
            .collect();
        pairs.sort();

        let mut hasher = Sha256::new();
        for (address, entity_id) in pairs {
            hasher.update(address.as_bytes());
            hasher.update([0u8]);
            hasher.update(entity_id.as_bytes());
            hasher.update([b'\n']);
        }
        format!("{:x}", hasher.finalize())
    }

    /// Owning entity for an address, or None when not designated
    pub fn lookup(&self, address: &str) -> Option<&SanctionedEntity> {
        let entry = self.designated_address(address)?;
        self.entity(&entry.entity_id)
    }

    pub fn designated_address(&self, address: &str) -> Option<&DesignatedAddress> {
        self.by_address.get(&normalize_address(address))
    }

    pub fn is_designated(&self, address: &str) -> bool {
        self.designated_address(address).is_some()
    }

    pub fn entity(&self, id: &str) -> Option<&SanctionedEntity> {
        self.by_entity.get(id).map(|&pos| &self.entities[pos])
    }

    pub fn entities(&self) -> &[SanctionedEntity] {
        &self.entities
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn address_count(&self) -> usize {
        self.by_address.len()
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

// ============================================================================
// ATOMIC HANDLE
// ============================================================================

/// Shared handle to the current snapshot (lock-free reads, atomic refresh)
pub struct DesignatedSetHandle {
    current: ArcSwap<DesignatedSetIndex>,
}

impl DesignatedSetHandle {
    pub fn new(index: DesignatedSetIndex) -> Self {
        DesignatedSetHandle {
            current: ArcSwap::from_pointee(index),
        }
    }

    /// Current snapshot; stays valid and unchanged for as long as it is held
    pub fn snapshot(&self) -> Arc<DesignatedSetIndex> {
        self.current.load_full()
    }

    /// Build a new snapshot from entities and swap it in
    pub fn refresh(&self, entities: &[SanctionedEntity]) -> Arc<DesignatedSetIndex> {
        let index = Arc::new(DesignatedSetIndex::build(entities));
        self.current.store(Arc::clone(&index));

        tracing::info!(
            target: "index",
            entities = index.entity_count(),
            addresses = index.address_count(),
            fingerprint = %index.fingerprint(),
            "designated set refreshed"
        );
        index
    }
}

impl Default for DesignatedSetHandle {
    fn default() -> Self {
        Self::new(DesignatedSetIndex::empty())
    }
}

// ============================================================================
// TESTS
// ============================================================================
