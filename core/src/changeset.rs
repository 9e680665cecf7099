use std::collections::BTreeSet;

use dashmap::DashMap;
use tracing::trace;

use crate::entity::{Entity, EntityState, ValueSide};
use crate::error::{StorageError, UpdateError};
use crate::input::MutationInput;
use crate::model::{MemberId, ObservedMember};
use crate::value::Value;

/// Raw change of one member of one entity
#[derive(Debug, Clone, PartialEq)]
pub enum MemberChange {
    /// `None` on the side where the entity does not exist
    Property { original: Option<Value>, current: Option<Value> },
    Navigation { added: BTreeSet<Entity>, removed: BTreeSet<Entity> },
}

impl MemberChange {
    pub fn is_empty(&self) -> bool {
        match self {
            MemberChange::Property { original, current } => original == current,
            MemberChange::Navigation { added, removed } => added.is_empty() && removed.is_empty(),
        }
    }

    /// The change that undoes this one
    fn reverted(&self) -> MemberChange {
        match self {
            MemberChange::Property { original, current } => MemberChange::Property { original: current.clone(), current: original.clone() },
            MemberChange::Navigation { added, removed } => MemberChange::Navigation { added: removed.clone(), removed: added.clone() },
        }
    }

    /// This change followed by `next`
    fn then(&self, next: &MemberChange) -> MemberChange {
        match (self, next) {
            (MemberChange::Property { original, .. }, MemberChange::Property { current, .. }) => {
                MemberChange::Property { original: original.clone(), current: current.clone() }
            }
            (MemberChange::Navigation { added: a1, removed: r1 }, MemberChange::Navigation { added: a2, removed: r2 }) => {
                MemberChange::Navigation {
                    added: a1.difference(r2).chain(a2.difference(r1)).copied().collect(),
                    removed: r1.difference(a2).chain(r2.difference(a1)).copied().collect(),
                }
            }
            (_, next) => next.clone(),
        }
    }
}

/// Net change of a navigation between two states that share the same base:
/// `added = (A₂∖A₁) ∪ (R₁∖R₂)`, `removed = (R₂∖R₁) ∪ (A₁∖A₂)`
pub fn navigation_delta<T: Ord + Clone>(previous: (&BTreeSet<T>, &BTreeSet<T>), current: (&BTreeSet<T>, &BTreeSet<T>)) -> (BTreeSet<T>, BTreeSet<T>) {
    let ((a1, r1), (a2, r2)) = (previous, current);
    let added = a2.difference(a1).chain(r1.difference(r2)).cloned().collect();
    let removed = r2.difference(r1).chain(a1.difference(a2)).cloned().collect();
    (added, removed)
}

/// Member changes of one mutation batch, keyed by `(member, entity)`
#[derive(Debug, Default)]
pub struct Changeset {
    changes: DashMap<(MemberId, Entity), MemberChange>,
    states: DashMap<Entity, EntityState>,
}

impl Changeset {
    pub fn new() -> Self { Self::default() }

    /// Record the raw changes of `members` (and of the inverses of navigations among them) made by the batch
    pub async fn capture(input: &dyn MutationInput, members: &[ObservedMember]) -> Result<Self, StorageError> {
        let model = input.model();
        let mut observed: BTreeSet<ObservedMember> = members.iter().copied().collect();
        for member in members {
            if let ObservedMember::Navigation(id) = member {
                if let Some(inverse) = model.inverse(*id) {
                    observed.insert(ObservedMember::Navigation(inverse));
                }
            }
        }

        let changeset = Changeset::new();
        let entries = input.entries();
        for entity in &entries {
            changeset.states.insert(*entity, input.state(*entity));
        }

        for member in observed {
            let def = model.member(member.id());
            let declared = entries.iter().copied().filter(|e| e.ty == def.declaring_type);
            match member {
                ObservedMember::Property(property) => {
                    for entity in declared {
                        let (original, current) = match input.state(entity) {
                            EntityState::Added => (None, Some(input.load_property(entity, property, ValueSide::Current).await?)),
                            EntityState::Removed => (Some(input.load_property(entity, property, ValueSide::Original).await?), None),
                            EntityState::Modified if input.is_modified(entity, property) => (
                                Some(input.load_property(entity, property, ValueSide::Original).await?),
                                Some(input.load_property(entity, property, ValueSide::Current).await?),
                            ),
                            _ => continue,
                        };
                        if original != current {
                            changeset.changes.insert((property, entity), MemberChange::Property { original, current });
                        }
                    }
                }
                ObservedMember::Navigation(navigation) => {
                    for entity in declared {
                        if let Some(delta) = input.navigation_delta(entity, navigation).filter(|d| !d.is_empty()) {
                            changeset.record_navigation(navigation, entity, delta.added, delta.removed);
                        }
                    }
                    if def.navigation().is_some_and(|nav| nav.many_to_many) {
                        let inverse = model.inverse(navigation);
                        for row in input.join_changes(navigation) {
                            let (added, removed) = if row.added { (Some(row.related), None) } else { (None, Some(row.related)) };
                            changeset.record_navigation(navigation, row.owner, added, removed);
                            if let Some(inverse) = inverse {
                                let (added, removed) = if row.added { (Some(row.owner), None) } else { (None, Some(row.owner)) };
                                changeset.record_navigation(inverse, row.related, added, removed);
                            }
                        }
                    }
                }
            }
        }
        trace!("captured {} member changes over {} entries", changeset.len(), entries.len());
        Ok(changeset)
    }

    pub fn record_property(&self, member: MemberId, entity: Entity, original: Option<Value>, current: Option<Value>) {
        self.changes.insert((member, entity), MemberChange::Property { original, current });
    }

    /// Union the given related entities into the navigation entry of `entity`
    pub fn record_navigation(
        &self,
        member: MemberId,
        entity: Entity,
        added: impl IntoIterator<Item = Entity>,
        removed: impl IntoIterator<Item = Entity>,
    ) {
        let mut entry = self
            .changes
            .entry((member, entity))
            .or_insert_with(|| MemberChange::Navigation { added: BTreeSet::new(), removed: BTreeSet::new() });
        if let MemberChange::Navigation { added: a, removed: r } = entry.value_mut() {
            a.extend(added);
            r.extend(removed);
        }
    }

    pub fn set_state(&self, entity: Entity, state: EntityState) { self.states.insert(entity, state); }

    pub fn state(&self, entity: Entity) -> EntityState { self.states.get(&entity).map(|s| *s).unwrap_or(EntityState::Unchanged) }

    /// Entities that were added or removed in the batch
    pub fn structural(&self) -> Vec<(Entity, EntityState)> {
        self.states
            .iter()
            .filter(|s| matches!(*s.value(), EntityState::Added | EntityState::Removed))
            .map(|s| (*s.key(), *s.value()))
            .collect()
    }

    pub fn get(&self, member: MemberId, entity: Entity) -> Option<MemberChange> { self.changes.get(&(member, entity)).map(|c| c.clone()) }

    pub fn changes_of(&self, member: MemberId) -> Vec<(Entity, MemberChange)> {
        self.changes.iter().filter(|c| c.key().0 == member).map(|c| (c.key().1, c.value().clone())).collect()
    }

    pub fn keys(&self) -> BTreeSet<(MemberId, Entity)> { self.changes.iter().map(|c| *c.key()).collect() }

    pub fn len(&self) -> usize { self.changes.len() }

    pub fn is_empty(&self) -> bool { self.changes.is_empty() }

    /// Replay every entry into `target`. With `detect_cycles`, an entry that already exists in the
    /// target is a cyclic update; otherwise the two changes are chained.
    pub fn merge_into(&self, target: &Changeset, detect_cycles: bool) -> Result<(), UpdateError> {
        for change in self.changes.iter() {
            let (member, entity) = *change.key();
            let merged = match target.changes.get(change.key()) {
                Some(_) if detect_cycles => return Err(UpdateError::CyclicUpdate { member, entity }),
                Some(existing) => existing.then(change.value()),
                None => change.value().clone(),
            };
            target.changes.insert((member, entity), merged);
        }
        for state in self.states.iter() {
            target.states.insert(*state.key(), *state.value());
        }
        Ok(())
    }

    /// Net changes made since `previous` was captured over the same batch.
    /// Entries that disappeared since then are reverted.
    pub fn delta_from(&self, previous: &Changeset) -> Changeset {
        let delta = Changeset::new();
        let keys: BTreeSet<(MemberId, Entity)> = self.keys().into_iter().chain(previous.keys()).collect();
        for key in keys {
            let before = previous.changes.get(&key).map(|c| c.clone());
            let after = self.changes.get(&key).map(|c| c.clone());
            let change = match (before, after) {
                (None, Some(after)) => after,
                (Some(before), None) => before.reverted(),
                (
                    Some(MemberChange::Property { current: before, .. }),
                    Some(MemberChange::Property { current: after, .. }),
                ) => MemberChange::Property { original: before, current: after },
                (
                    Some(MemberChange::Navigation { added: a1, removed: r1 }),
                    Some(MemberChange::Navigation { added: a2, removed: r2 }),
                ) => {
                    let (added, removed) = navigation_delta((&a1, &r1), (&a2, &r2));
                    MemberChange::Navigation { added, removed }
                }
                (_, Some(after)) => after,
                (None, None) => continue,
            };
            if !change.is_empty() {
                delta.changes.insert(key, change);
            }
        }
        for state in self.states.iter() {
            if previous.state(*state.key()) != *state.value() {
                delta.states.insert(*state.key(), *state.value());
            }
        }
        delta
    }
}
