//! Core domain model for plangob: local party entities, remote catalog records and match results.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

pub mod names;

pub use names::{normalize_name, sanitize_folder_name};

pub const CRATE_NAME: &str = "plangob-core";

/// One of the two documents every party folder must eventually hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Slot {
    GovernmentPlan,
    PlanSummary,
}

impl Slot {
    pub const ALL: [Slot; 2] = [Slot::GovernmentPlan, Slot::PlanSummary];

    /// File name of the slot inside the entity's documents folder.
    pub fn file_name(self) -> &'static str {
        match self {
            Slot::GovernmentPlan => "PLAN GOBIERNO.pdf",
            Slot::PlanSummary => "PLAN RESUMEN.pdf",
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Slot::GovernmentPlan => f.write_str("GOVERNMENT_PLAN"),
            Slot::PlanSummary => f.write_str("PLAN_SUMMARY"),
        }
    }
}

/// Stable handle of an entity inside one [`EntityRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId(usize);

impl EntityId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// A provisioned local party folder and the slots it already has on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    id: EntityId,
    identity: String,
    satisfied: BTreeSet<Slot>,
}

impl Entity {
    pub fn new(identity: impl Into<String>, satisfied: impl IntoIterator<Item = Slot>) -> Self {
        Self {
            id: EntityId(0),
            identity: identity.into(),
            satisfied: satisfied.into_iter().collect(),
        }
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    /// Folder name, case preserved.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Case-insensitive uniqueness key.
    pub fn identity_key(&self) -> String {
        self.identity.to_lowercase()
    }

    pub fn normalized_name(&self) -> String {
        normalize_name(&self.identity)
    }

    pub fn satisfied(&self) -> &BTreeSet<Slot> {
        &self.satisfied
    }

    pub fn is_satisfied(&self, slot: Slot) -> bool {
        self.satisfied.contains(&slot)
    }

    pub fn missing_slots(&self) -> Vec<Slot> {
        Slot::ALL
            .into_iter()
            .filter(|slot| !self.satisfied.contains(slot))
            .collect()
    }

    pub fn is_pending(&self) -> bool {
        !self.missing_slots().is_empty()
    }
}

/// Known local entities in scan order, with their satisfaction state for the current run.
#[derive(Debug, Clone, Default)]
pub struct EntityRegistry {
    entities: Vec<Entity>,
}

impl EntityRegistry {
    /// Builds the registry, keeping the first entity for every case-insensitive identity.
    pub fn from_entities(entities: impl IntoIterator<Item = Entity>) -> Self {
        let mut seen: HashMap<String, usize> = HashMap::new();
        let mut kept: Vec<Entity> = Vec::new();
        for mut entity in entities {
            if let Some(&index) = seen.get(&entity.identity_key()) {
                warn!(
                    identity = %entity.identity,
                    kept = %kept[index].identity,
                    "folder differs from an earlier one only by case; ignored"
                );
                continue;
            }
            seen.insert(entity.identity_key(), kept.len());
            entity.id = EntityId(kept.len());
            kept.push(entity);
        }
        Self { entities: kept }
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn get(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(id.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.entities.iter()
    }

    /// Entities still missing at least one slot, in scan order.
    pub fn pending(&self) -> Vec<&Entity> {
        self.entities.iter().filter(|e| e.is_pending()).collect()
    }

    pub fn complete_count(&self) -> usize {
        self.entities.len() - self.pending().len()
    }

    /// Records a satisfied slot. Returns `false` when nothing changed.
    pub fn mark_satisfied(&mut self, id: EntityId, slot: Slot) -> bool {
        match self.entities.get_mut(id.0) {
            Some(entity) => entity.satisfied.insert(slot),
            None => false,
        }
    }
}

/// One item of a catalog page. Only non-empty locators are kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRecord {
    pub raw_name: String,
    pub artifact_refs: BTreeMap<Slot, String>,
}

impl RemoteRecord {
    pub fn new(raw_name: impl Into<String>) -> Self {
        Self {
            raw_name: raw_name.into(),
            artifact_refs: BTreeMap::new(),
        }
    }

    /// Attaches a locator; blank values are treated as absent.
    pub fn with_locator(mut self, slot: Slot, locator: Option<&str>) -> Self {
        if let Some(locator) = locator.map(str::trim).filter(|l| !l.is_empty()) {
            self.artifact_refs.insert(slot, locator.to_string());
        }
        self
    }

    pub fn normalized_name(&self) -> String {
        normalize_name(&self.raw_name)
    }

    pub fn locator(&self, slot: Slot) -> Option<&str> {
        self.artifact_refs.get(&slot).map(String::as_str)
    }
}

/// Outcome of pairing one remote record against the pending entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchResult<'a> {
    NoMatch,
    Matched(&'a Entity),
}

impl<'a> MatchResult<'a> {
    pub fn entity(self) -> Option<&'a Entity> {
        match self {
            MatchResult::Matched(entity) => Some(entity),
            MatchResult::NoMatch => None,
        }
    }
}
