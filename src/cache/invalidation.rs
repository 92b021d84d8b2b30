//! Mutation-driven cache invalidation
//!
//! When a character, play, actor or scene changes, every cached read that
//! could have included it must go. The cascade for each entity type is a
//! static [`InvalidationRule`]; [`InvalidationPlan`] substitutes the entity
//! id into it, and [`Invalidator`] applies the plan against a backend.
//!
//! Delivery is at-least-once: a plan that cannot be applied within the
//! mutation retry budget is queued and replayed by [`Invalidator::flush_pending`].
//! Applying a plan twice is harmless.

use crate::cache::keys::{
    derive_key, derive_prefix, AiOp, CacheKey, KeyPrefix, LibraryOp, Operation, QueryDescriptor,
    SearchOp, ViewOp,
};
use crate::cache::store::CacheBackend;
use crate::cache::types::CacheValue;
use crate::error::{CacheError, QueryError};
use crate::retry::{with_retry, RetryPolicy};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Kind of entity whose mutation triggers invalidation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Character,
    Play,
    Actor,
    Scene,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Character => "character",
            EntityType::Play => "play",
            EntityType::Actor => "actor",
            EntityType::Scene => "scene",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "character" => Ok(EntityType::Character),
            "play" => Ok(EntityType::Play),
            "actor" => Ok(EntityType::Actor),
            "scene" => Ok(EntityType::Scene),
            other => Err(QueryError::InvalidDescriptor(format!("unknown entity type '{}'", other))),
        }
    }
}

/// A change to one entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mutation {
    /// Correlates log lines and deferred replays
    pub id: Uuid,
    pub entity: EntityType,
    pub entity_id: String,
    pub occurred_at: DateTime<Utc>,
}

impl Mutation {
    pub fn new(entity: EntityType, entity_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            entity,
            entity_id: entity_id.into(),
            occurred_at: Utc::now(),
        }
    }
}

impl fmt::Display for Mutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}' ({})", self.entity, self.entity_id, self.id)
    }
}

/// One thing to remove when an entity changes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// The single key `op(<id>)`
    Key(Operation),
    /// Every key of `op` whose first parameter is `<id>`
    IdPrefix(Operation),
    /// Every key of `op`
    Operation(Operation),
}

/// Static cascade for one entity type
#[derive(Debug, Clone, Copy)]
pub struct InvalidationRule {
    pub entity: EntityType,
    pub targets: &'static [Target],
}

const CHARACTER_TARGETS: &[Target] = &[
    Target::Key(Operation::View(ViewOp::Character)),
    Target::Key(Operation::Search(SearchOp::CharacterByName)),
    Target::Operation(Operation::Search(SearchOp::CharacterByName)),
    Target::IdPrefix(Operation::Search(SearchOp::PlaysByCharacter)),
    Target::IdPrefix(Operation::Search(SearchOp::ActorsByCharacter)),
    Target::IdPrefix(Operation::Search(SearchOp::ScenesByCharacter)),
    Target::IdPrefix(Operation::Search(SearchOp::QuotesByCharacter)),
    Target::IdPrefix(Operation::Ai(AiOp::ChatResponse)),
    Target::Operation(Operation::Library(LibraryOp::Characters)),
    Target::Operation(Operation::Search(SearchOp::CharactersByPlay)),
];

const PLAY_TARGETS: &[Target] = &[
    Target::Key(Operation::View(ViewOp::Play)),
    Target::Operation(Operation::View(ViewOp::Scene)),
    Target::Operation(Operation::Search(SearchOp::PlaysByCharacter)),
    Target::IdPrefix(Operation::Search(SearchOp::CharactersByPlay)),
    Target::Operation(Operation::Library(LibraryOp::Plays)),
    Target::IdPrefix(Operation::Library(LibraryOp::ScenesByPlay)),
    Target::Operation(Operation::Search(SearchOp::ScenesByCharacter)),
];

const ACTOR_TARGETS: &[Target] = &[
    Target::Key(Operation::View(ViewOp::Actor)),
    Target::Operation(Operation::Search(SearchOp::ActorsByCharacter)),
    Target::Operation(Operation::Library(LibraryOp::Actors)),
];

const SCENE_TARGETS: &[Target] = &[
    Target::Key(Operation::View(ViewOp::Scene)),
    Target::Operation(Operation::Search(SearchOp::ScenesByCharacter)),
    Target::Operation(Operation::Search(SearchOp::QuotesByCharacter)),
    Target::Operation(Operation::Library(LibraryOp::ScenesByPlay)),
];

/// Look up the cascade for an entity type
pub fn rule_for(entity: EntityType) -> InvalidationRule {
    let targets = match entity {
        EntityType::Character => CHARACTER_TARGETS,
        EntityType::Play => PLAY_TARGETS,
        EntityType::Actor => ACTOR_TARGETS,
        EntityType::Scene => SCENE_TARGETS,
    };
    InvalidationRule { entity, targets }
}

/// Concrete keys and prefixes to remove for one mutation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvalidationPlan {
    pub keys: Vec<CacheKey>,
    pub prefixes: Vec<KeyPrefix>,
}

impl InvalidationPlan {
    pub fn for_mutation(mutation: &Mutation) -> Self {
        Self::for_entity(mutation.entity, &mutation.entity_id)
    }

    pub fn for_entity(entity: EntityType, entity_id: &str) -> Self {
        let mut plan = Self::default();

        for target in rule_for(entity).targets {
            match *target {
                Target::Key(op) => match QueryDescriptor::new(op, [entity_id]) {
                    Ok(descriptor) => plan.keys.push(derive_key(&descriptor)),
                    Err(_) => plan
                        .prefixes
                        .push(derive_prefix(op.domain(), Some(op)).with_param(entity_id)),
                },
                Target::IdPrefix(op) => plan
                    .prefixes
                    .push(derive_prefix(op.domain(), Some(op)).with_param(entity_id)),
                Target::Operation(op) => plan.prefixes.push(derive_prefix(op.domain(), Some(op))),
            }
        }

        plan
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty() && self.prefixes.is_empty()
    }
}

/// Outcome of handling one mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationReport {
    pub mutation_id: Uuid,
    pub entity: EntityType,
    pub entity_id: String,
    /// Entries removed by this application of the plan
    pub removed: usize,
    /// True when the backend failed and the mutation was queued for replay
    pub deferred: bool,
    pub timestamp: DateTime<Utc>,
}

/// Applies invalidation plans and keeps failed ones for replay
pub struct Invalidator<B: ?Sized, V = CacheValue> {
    backend: Arc<B>,
    pending: Mutex<VecDeque<Mutation>>,
    _value: PhantomData<fn() -> V>,
}

impl<B, V> Invalidator<B, V>
where
    B: CacheBackend<V> + ?Sized,
    V: Send + 'static,
{
    pub fn new(backend: Arc<B>) -> Self {
        Self {
            backend,
            pending: Mutex::new(VecDeque::new()),
            _value: PhantomData,
        }
    }

    /// Apply the cascade for `mutation`. Never fails: if the backend stays
    /// unavailable through the retry budget the mutation is queued.
    pub async fn on_mutation(&self, mutation: &Mutation, retry: &RetryPolicy) -> InvalidationReport {
        let plan = InvalidationPlan::for_mutation(mutation);

        let (removed, deferred) = match with_retry(retry, || self.apply(&plan), CacheError::is_transient).await {
            Ok(removed) => {
                info!("Invalidated {} entries for {}", removed, mutation);
                (removed, false)
            }
            Err(e) => {
                error!("Invalidation for {} failed, queued for replay: {}", mutation, e);
                self.pending.lock().push_back(mutation.clone());
                (0, true)
            }
        };

        InvalidationReport {
            mutation_id: mutation.id,
            entity: mutation.entity,
            entity_id: mutation.entity_id.clone(),
            removed,
            deferred,
            timestamp: Utc::now(),
        }
    }

    /// Replay queued mutations in order. Each stays at the head of the queue
    /// until it has been applied, so concurrent readers still see it pending.
    /// Stops at the first one that still fails.
    pub async fn flush_pending(&self, retry: &RetryPolicy) -> usize {
        let mut applied = 0;

        loop {
            let head = self.pending.lock().front().cloned();
            let Some(mutation) = head else { break };
            let plan = InvalidationPlan::for_mutation(&mutation);
            match with_retry(retry, || self.apply(&plan), CacheError::is_transient).await {
                Ok(removed) => {
                    info!("Replayed invalidation for {}: {} entries removed", mutation, removed);
                    let mut pending = self.pending.lock();
                    if pending.front().map(|m| m.id) == Some(mutation.id) {
                        pending.pop_front();
                    }
                    applied += 1;
                }
                Err(e) => {
                    warn!("Deferred invalidation for {} still failing: {}", mutation, e);
                    break;
                }
            }
        }

        applied
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    async fn apply(&self, plan: &InvalidationPlan) -> Result<usize, CacheError> {
        let mut removed = 0;
        for key in &plan.keys {
            if self.backend.evict(key).await? {
                removed += 1;
            }
        }
        for prefix in &plan.prefixes {
            removed += self.backend.evict_by_prefix(prefix).await?;
        }
        Ok(removed)
    }
}
