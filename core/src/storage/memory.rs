use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use tracing::{debug, trace};

use crate::entity::{Entity, EntityState, ValueSide};
use crate::error::StorageError;
use crate::id::EntityId;
use crate::input::{JoinChange, MutableInput, MutationInput, NavigationDelta};
use crate::model::{Cardinality, MemberDef, MemberId, MemberKind, Model};
use crate::util::SafeMap;
use crate::value::Value;

/// How a navigation is persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Layout {
    /// A foreign key on the owning row
    Reference,
    /// Rows of the target type whose `inverse` foreign key points at the owner
    Derived { inverse: MemberId },
    /// Join rows stored under `canonical`, oriented `(canonical owner, canonical related)`
    Links { canonical: MemberId, forward: bool },
}

fn layout(model: &Model, navigation: MemberId) -> Result<Layout, StorageError> {
    let nav = model.navigation(navigation).ok_or(StorageError::WrongMemberKind { member: navigation, expected: "navigation" })?;
    let inverse = nav.inverse.and_then(|inverse| model.navigation(inverse).map(|def| (inverse, def.cardinality)));
    Ok(match (nav.cardinality, inverse) {
        // one-to-one keeps the key on the lower member
        (Cardinality::One, Some((inverse, Cardinality::One))) if inverse < navigation => Layout::Derived { inverse },
        (Cardinality::One, _) => Layout::Reference,
        (Cardinality::Many, Some((inverse, Cardinality::One))) => Layout::Derived { inverse },
        (Cardinality::Many, Some((inverse, Cardinality::Many))) => {
            let canonical = navigation.min(inverse);
            Layout::Links { canonical, forward: canonical == navigation }
        }
        (Cardinality::Many, None) => Layout::Links { canonical: navigation, forward: true },
    })
}

#[derive(Debug, Clone, Default)]
struct Row {
    properties: HashMap<MemberId, Value>,
    references: HashMap<MemberId, Entity>,
}

#[derive(Debug, Clone, Default)]
struct Tables {
    rows: HashMap<Entity, Row>,
    links: BTreeSet<(MemberId, Entity, Entity)>,
}

impl Tables {
    fn row(&self, entity: Entity) -> Result<&Row, StorageError> { self.rows.get(&entity).ok_or(StorageError::EntityNotFound(entity)) }

    fn row_mut(&mut self, entity: Entity) -> Result<&mut Row, StorageError> { self.rows.get_mut(&entity).ok_or(StorageError::EntityNotFound(entity)) }

    fn property(&self, entity: Entity, property: MemberId) -> Option<Value> {
        self.rows.get(&entity).map(|row| row.properties.get(&property).cloned().unwrap_or(Value::Null))
    }

    /// Related entities in id order. Empty when `entity` does not exist.
    fn related(&self, entity: Entity, layout: Layout, navigation: MemberId) -> Vec<Entity> {
        let Some(row) = self.rows.get(&entity) else {
            return Vec::new();
        };
        let mut related: Vec<Entity> = match layout {
            Layout::Reference => row.references.get(&navigation).copied().into_iter().collect(),
            Layout::Derived { inverse } => {
                self.rows.iter().filter(|(_, r)| r.references.get(&inverse) == Some(&entity)).map(|(e, _)| *e).collect()
            }
            Layout::Links { canonical, forward } => self
                .links
                .iter()
                .filter(|(member, owner, related)| *member == canonical && if forward { *owner == entity } else { *related == entity })
                .map(|(_, owner, related)| if forward { *related } else { *owner })
                .collect(),
        };
        related.sort();
        related
    }

    fn link(canonical: MemberId, forward: bool, entity: Entity, related: Entity) -> (MemberId, Entity, Entity) {
        if forward {
            (canonical, entity, related)
        } else {
            (canonical, related, entity)
        }
    }
}

/// An in-memory entity store with batch semantics: a [`Batch`] sees the committed state as its
/// original side and its own writes as the current side.
#[derive(Debug)]
pub struct MemoryStore {
    model: Arc<Model>,
    committed: RwLock<Tables>,
    loads: SafeMap<(MemberId, ValueSide), usize>,
}

impl MemoryStore {
    pub fn new(model: Arc<Model>) -> Arc<Self> { Arc::new(Self { model, committed: RwLock::new(Tables::default()), loads: SafeMap::new() }) }

    pub fn model(&self) -> &Arc<Model> { &self.model }

    /// Start a batch over the committed state
    pub fn batch(self: &Arc<Self>) -> Result<Batch, StorageError> {
        let tables = self.committed.read().map_err(|_| StorageError::Poisoned)?.clone();
        Ok(Batch { store: self.clone(), original: tables.clone(), current: RwLock::new(tables), touched: RwLock::new(BTreeSet::new()) })
    }

    /// Bulk navigation loads issued for `navigation` on either side
    pub fn load_count(&self, navigation: MemberId) -> usize { ValueSide::BOTH.iter().map(|side| self.loads.count(&(navigation, *side))).sum() }

    pub fn reset_load_counts(&self) { self.loads.clear() }
}

/// One unit of work against a [`MemoryStore`]. Nothing is visible to other batches until
/// [`Batch::commit`].
#[derive(Debug)]
pub struct Batch {
    store: Arc<MemoryStore>,
    original: Tables,
    current: RwLock<Tables>,
    touched: RwLock<BTreeSet<Entity>>,
}

impl Batch {
    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>, StorageError> { self.current.read().map_err(|_| StorageError::Poisoned) }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>, StorageError> { self.current.write().map_err(|_| StorageError::Poisoned) }

    fn touch(&self, entities: impl IntoIterator<Item = Entity>) -> Result<(), StorageError> {
        self.touched.write().map_err(|_| StorageError::Poisoned)?.extend(entities);
        Ok(())
    }

    fn tables(&self, side: ValueSide) -> Result<TablesRef<'_>, StorageError> {
        Ok(match side {
            ValueSide::Original => TablesRef::Original(&self.original),
            ValueSide::Current => TablesRef::Current(self.read()?),
        })
    }

    fn member_named(&self, entity: Entity, name: &str) -> Result<&MemberDef, StorageError> {
        let model = &self.store.model;
        model
            .member_by_name(entity.ty, name)
            .ok_or_else(|| StorageError::Other(anyhow::anyhow!("{} has no member {}", model.entity_type_by_id(entity.ty).name, name)))
    }

    /// Insert a new entity of the named type with no values
    pub fn create(&self, entity_type: &str) -> Result<Entity, StorageError> {
        let ty = self.store.model.entity_type(entity_type).ok_or_else(|| StorageError::Other(anyhow::anyhow!("unknown entity type {}", entity_type)))?.id;
        let entity = Entity::new(EntityId::new(), ty);
        self.write()?.rows.insert(entity, Row::default());
        self.touch([entity])?;
        trace!("created {}", entity);
        Ok(entity)
    }

    /// Delete an entity. References to it are cleared and its join rows deleted.
    pub fn remove(&self, entity: Entity) -> Result<(), StorageError> {
        let mut cleared = Vec::new();
        {
            let mut tables = self.write()?;
            tables.rows.remove(&entity).ok_or(StorageError::EntityNotFound(entity))?;
            for (other, row) in tables.rows.iter_mut() {
                let before = row.references.len();
                row.references.retain(|_, target| *target != entity);
                if row.references.len() != before {
                    cleared.push(*other);
                }
            }
            tables.links.retain(|(_, owner, related)| *owner != entity && *related != entity);
        }
        self.touch(cleared.into_iter().chain([entity]))
    }

    pub fn set(&self, entity: Entity, property: &str, value: impl Into<Value>) -> Result<(), StorageError> {
        let property = self.member_named(entity, property)?.id;
        self.set_value(entity, property, value.into())
    }

    /// Point a reference navigation at `target`, or clear it
    pub fn set_reference(&self, entity: Entity, navigation: &str, target: Option<Entity>) -> Result<(), StorageError> {
        let navigation = self.member_named(entity, navigation)?.id;
        self.assign(entity, navigation, target.into_iter().collect())
    }

    /// Add `related` to a navigation of `entity`; for a reference navigation this replaces the target
    pub fn add_to(&self, entity: Entity, navigation: &str, related: Entity) -> Result<(), StorageError> {
        let navigation = self.member_named(entity, navigation)?.id;
        let mut members = self.read()?.related(entity, layout(&self.store.model, navigation)?, navigation);
        if self.store.model.navigation(navigation).is_some_and(|nav| nav.cardinality == Cardinality::One) {
            members.clear();
        }
        if !members.contains(&related) {
            members.push(related);
        }
        self.assign(entity, navigation, members)
    }

    pub fn remove_from(&self, entity: Entity, navigation: &str, related: Entity) -> Result<(), StorageError> {
        let navigation = self.member_named(entity, navigation)?.id;
        let mut members = self.read()?.related(entity, layout(&self.store.model, navigation)?, navigation);
        members.retain(|e| *e != related);
        self.assign(entity, navigation, members)
    }

    /// Current value of a property, for inspection
    pub fn get(&self, entity: Entity, property: &str) -> Result<Value, StorageError> {
        let property = self.member_named(entity, property)?.id;
        self.read()?.property(entity, property).ok_or(StorageError::EntityNotFound(entity))
    }

    /// Current related entities of a navigation, for inspection
    pub fn related(&self, entity: Entity, navigation: &str) -> Result<Vec<Entity>, StorageError> {
        let navigation = self.member_named(entity, navigation)?.id;
        Ok(self.read()?.related(entity, layout(&self.store.model, navigation)?, navigation))
    }

    /// Make the current side the committed state of the store
    pub fn commit(self) -> Result<(), StorageError> {
        let tables = self.current.into_inner().map_err(|_| StorageError::Poisoned)?;
        debug!("committing {} rows, {} join rows", tables.rows.len(), tables.links.len());
        *self.store.committed.write().map_err(|_| StorageError::Poisoned)? = tables;
        Ok(())
    }

    fn set_value(&self, entity: Entity, property: MemberId, value: Value) -> Result<(), StorageError> {
        if !matches!(self.store.model.member(property).kind, MemberKind::Property) {
            return Err(StorageError::WrongMemberKind { member: property, expected: "property" });
        }
        self.write()?.row_mut(entity)?.properties.insert(property, value);
        self.touch([entity])
    }

    /// Replace the related entities of `entity` through `navigation`
    fn assign(&self, entity: Entity, navigation: MemberId, related: Vec<Entity>) -> Result<(), StorageError> {
        let layout = layout(&self.store.model, navigation)?;
        let mut touched = vec![entity];
        {
            let mut tables = self.write()?;
            tables.row(entity)?;
            for target in &related {
                tables.row(*target)?;
            }
            match layout {
                Layout::Reference => {
                    let row = tables.row_mut(entity)?;
                    match related.first() {
                        Some(target) => row.references.insert(navigation, *target),
                        None => row.references.remove(&navigation),
                    };
                }
                Layout::Derived { inverse } => {
                    let previous = tables.related(entity, layout, navigation);
                    for old in previous.iter().filter(|e| !related.contains(e)) {
                        tables.row_mut(*old)?.references.remove(&inverse);
                        touched.push(*old);
                    }
                    for new in related.iter().filter(|e| !previous.contains(e)) {
                        tables.row_mut(*new)?.references.insert(inverse, entity);
                        touched.push(*new);
                    }
                }
                Layout::Links { canonical, forward } => {
                    for old in tables.related(entity, layout, navigation) {
                        tables.links.remove(&Tables::link(canonical, forward, entity, old));
                    }
                    for new in &related {
                        tables.links.insert(Tables::link(canonical, forward, entity, *new));
                    }
                }
            }
        }
        self.touch(touched)
    }
}

enum TablesRef<'a> {
    Original(&'a Tables),
    Current(RwLockReadGuard<'a, Tables>),
}

impl std::ops::Deref for TablesRef<'_> {
    type Target = Tables;
    fn deref(&self) -> &Tables {
        match self {
            TablesRef::Original(tables) => tables,
            TablesRef::Current(guard) => guard,
        }
    }
}

#[async_trait]
impl MutationInput for Batch {
    fn model(&self) -> &Model { &self.store.model }

    fn entries(&self) -> Vec<Entity> {
        let touched: Vec<Entity> = self.touched.read().map(|t| t.iter().copied().collect()).unwrap_or_default();
        touched.into_iter().filter(|e| self.state(*e) != EntityState::Unchanged).collect()
    }

    fn state(&self, entity: Entity) -> EntityState {
        let current = self.read().map(|t| t.rows.contains_key(&entity)).unwrap_or(false);
        let touched = self.touched.read().map(|t| t.contains(&entity)).unwrap_or(false);
        match (self.original.rows.contains_key(&entity), current) {
            (false, true) => EntityState::Added,
            (true, false) => EntityState::Removed,
            (true, true) if touched => EntityState::Modified,
            _ => EntityState::Unchanged,
        }
    }

    fn is_modified(&self, entity: Entity, property: MemberId) -> bool {
        let current = self.read().ok().and_then(|t| t.property(entity, property));
        matches!((self.original.property(entity, property), current), (Some(original), Some(current)) if original != current)
    }

    fn navigation_delta(&self, entity: Entity, navigation: MemberId) -> Option<NavigationDelta> {
        if self.state(entity) == EntityState::Unchanged {
            return None;
        }
        let layout = layout(&self.store.model, navigation).ok()?;
        if matches!(layout, Layout::Links { .. }) {
            return None;
        }
        let original: BTreeSet<Entity> = self.original.related(entity, layout, navigation).into_iter().collect();
        let current: BTreeSet<Entity> = self.read().ok()?.related(entity, layout, navigation).into_iter().collect();
        let delta = NavigationDelta {
            added: current.difference(&original).copied().collect(),
            removed: original.difference(&current).copied().collect(),
        };
        Some(delta).filter(|d| !d.is_empty())
    }

    fn join_changes(&self, navigation: MemberId) -> Vec<JoinChange> {
        let Ok(Layout::Links { canonical, forward }) = layout(&self.store.model, navigation) else {
            return Vec::new();
        };
        let Ok(current) = self.read() else {
            return Vec::new();
        };
        let rows = |tables: &Tables| -> BTreeSet<(Entity, Entity)> {
            tables.links.iter().filter(|(member, _, _)| *member == canonical).map(|(_, a, b)| if forward { (*a, *b) } else { (*b, *a) }).collect()
        };
        let (before, after) = (rows(&self.original), rows(&current));
        let added = after.difference(&before).map(|(owner, related)| JoinChange { owner: *owner, related: *related, added: true });
        let removed = before.difference(&after).map(|(owner, related)| JoinChange { owner: *owner, related: *related, added: false });
        added.chain(removed).collect()
    }

    async fn load_property(&self, entity: Entity, property: MemberId, side: ValueSide) -> Result<Value, StorageError> {
        if !matches!(self.store.model.member(property).kind, MemberKind::Property) {
            return Err(StorageError::WrongMemberKind { member: property, expected: "property" });
        }
        self.tables(side)?.property(entity, property).ok_or(StorageError::EntityNotFound(entity))
    }

    async fn load_navigation(
        &self,
        entities: &[Entity],
        navigation: MemberId,
        side: ValueSide,
    ) -> Result<HashMap<Entity, Vec<Entity>>, StorageError> {
        let layout = layout(&self.store.model, navigation)?;
        let count = self.store.loads.increment((navigation, side));
        trace!("load {} {} for {} entities (load #{})", self.store.model.qualified_name(navigation), side, entities.len(), count);
        let tables = self.tables(side)?;
        Ok(entities.iter().map(|entity| (*entity, tables.related(*entity, layout, navigation))).collect())
    }
}

#[async_trait]
impl MutableInput for Batch {
    fn as_input(&self) -> &dyn MutationInput { self }

    async fn set_property(&self, entity: Entity, property: MemberId, value: Value) -> Result<(), StorageError> {
        self.set_value(entity, property, value)
    }

    async fn set_navigation(&self, entity: Entity, navigation: MemberId, related: Vec<Entity>) -> Result<(), StorageError> {
        self.assign(entity, navigation, related)
    }
}
