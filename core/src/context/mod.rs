//! Entity context graph.
//!
//! A context stands for "the set of entities reachable at this point of the expression". Contexts form
//! a DAG rooted at the entity the expression is evaluated for; member reads are registered on the
//! context they are made from. Walking the graph from the leaves up tells which root entities a batch
//! of changes affects.

mod affected;
mod key;

pub use key::{ContextKey, KeyPart};

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use crate::error::ConfigurationError;
use crate::model::{EntityTypeId, MemberId, Model, ObservedMember};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(pub usize);

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "#{}", self.0) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextKind {
    Root,
    /// Entities reached through `navigation` from the parent's entities
    Navigation { navigation: MemberId },
    /// A lambda parameter bound to the parent's entities
    Scoped,
    Distinct,
    /// Several contexts reaching one expression node
    Composite,
    ChangeTracking { tracked: bool },
    /// No entities at all
    Empty,
}

#[derive(Debug, Clone)]
pub struct ContextNode {
    pub id: ContextId,
    pub kind: ContextKind,
    /// `None` only for `Empty`
    pub entity_type: Option<EntityTypeId>,
    pub tracking: bool,
    pub parents: Vec<ContextId>,
    pub children: Vec<ContextId>,
    pub observed: BTreeSet<ObservedMember>,
    pub load_all: bool,
    eager: bool,
}

impl ContextNode {
    /// Whether navigations into this context must be fully loaded. Set by [`ContextGraph::finalize`].
    pub fn is_eager(&self) -> bool { self.eager }
}

#[derive(Debug, Clone)]
pub struct ContextGraph {
    nodes: Vec<ContextNode>,
    navigations: HashMap<(ContextId, MemberId), ContextId>,
    wrappers: HashMap<(ContextId, ContextKind), ContextId>,
    composites: HashMap<Vec<ContextId>, ContextId>,
    empty: Option<ContextId>,
}

impl ContextGraph {
    pub fn new(root_type: EntityTypeId) -> Self {
        let mut graph = Self { nodes: Vec::new(), navigations: HashMap::new(), wrappers: HashMap::new(), composites: HashMap::new(), empty: None };
        graph.push(ContextKind::Root, Some(root_type), true, Vec::new());
        graph
    }

    pub fn root(&self) -> ContextId { ContextId(0) }

    pub fn root_type(&self) -> EntityTypeId { self.nodes[0].entity_type.unwrap_or(EntityTypeId(0)) }

    pub fn node(&self, id: ContextId) -> &ContextNode { &self.nodes[id.0] }

    pub fn nodes(&self) -> &[ContextNode] { &self.nodes }

    pub fn len(&self) -> usize { self.nodes.len() }

    pub fn is_empty(&self) -> bool { self.nodes.is_empty() }

    /// The context of `parent.navigation`, created once per parent and navigation
    pub fn navigation(&mut self, parent: ContextId, navigation: MemberId, target: EntityTypeId) -> ContextId {
        if let Some(existing) = self.navigations.get(&(parent, navigation)) {
            return *existing;
        }
        let tracking = self.nodes[parent.0].tracking;
        let id = self.push(ContextKind::Navigation { navigation }, Some(target), tracking, vec![parent]);
        self.navigations.insert((parent, navigation), id);
        id
    }

    pub fn scoped(&mut self, parent: ContextId) -> ContextId {
        let node = &self.nodes[parent.0];
        let (entity_type, tracking) = (node.entity_type, node.tracking);
        self.push(ContextKind::Scoped, entity_type, tracking, vec![parent])
    }

    pub fn distinct(&mut self, parent: ContextId) -> ContextId { self.wrap(parent, ContextKind::Distinct) }

    pub fn change_tracking(&mut self, parent: ContextId, tracked: bool) -> ContextId { self.wrap(parent, ContextKind::ChangeTracking { tracked }) }

    pub fn empty(&mut self) -> ContextId {
        if let Some(empty) = self.empty {
            return empty;
        }
        let id = self.push(ContextKind::Empty, None, false, Vec::new());
        self.empty = Some(id);
        id
    }

    /// A single context standing for all of `contexts`. Tracks changes if any of them does.
    pub fn composite(&mut self, contexts: &[ContextId], model: &Model) -> Result<ContextId, ConfigurationError> {
        let mut parents: Vec<ContextId> = contexts.to_vec();
        parents.sort();
        parents.dedup();
        if let [single] = parents.as_slice() {
            return Ok(*single);
        }
        if let Some(existing) = self.composites.get(&parents) {
            return Ok(*existing);
        }
        let types: BTreeSet<Option<EntityTypeId>> = parents.iter().map(|p| self.nodes[p.0].entity_type).collect();
        if types.len() != 1 {
            let names: Vec<String> =
                types.iter().map(|t| t.map(|t| model.entity_type_by_id(t).name.clone()).unwrap_or_else(|| "none".into())).collect();
            return Err(ConfigurationError::Unsupported(format!("one expression reaches entities of different types: {}", names.join(", "))));
        }
        let entity_type = types.into_iter().next().flatten();
        let tracking = parents.iter().any(|p| self.nodes[p.0].tracking);
        let id = self.push(ContextKind::Composite, entity_type, tracking, parents.clone());
        self.composites.insert(parents, id);
        Ok(id)
    }

    pub fn observe(&mut self, context: ContextId, member: ObservedMember) { self.nodes[context.0].observed.insert(member); }

    pub fn mark_load_all(&mut self, context: ContextId) { self.nodes[context.0].load_all = true; }

    /// Every member observed anywhere in the graph
    pub fn observed_members(&self) -> BTreeSet<ObservedMember> { self.nodes.iter().flat_map(|n| n.observed.iter().copied()).collect() }

    /// Whether `context` or any of its descendants observes a member
    pub fn subtree_observes(&self, context: ContextId) -> bool {
        let mut stack = vec![context];
        let mut seen = BTreeSet::new();
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            let node = &self.nodes[id.0];
            if !node.observed.is_empty() {
                return true;
            }
            stack.extend(node.children.iter().copied());
        }
        false
    }

    /// Check the graph and derive the effective loading mode of every context.
    ///
    /// A navigation with changes observed beneath it needs an inverse to map those changes back to the
    /// owning entities.
    pub fn finalize(&mut self, model: &Model) -> Result<(), ConfigurationError> {
        if self.observed_members().is_empty() {
            return Err(ConfigurationError::NoObservedMembers);
        }
        for node in &self.nodes {
            if let ContextKind::Navigation { navigation } = node.kind {
                if model.inverse(navigation).is_none() && self.subtree_observes(node.id) {
                    return Err(ConfigurationError::MissingInverse(model.qualified_name(navigation)));
                }
            }
        }
        self.resolve_loading(model);
        Ok(())
    }

    /// Derive eager flags without validating the graph. Navigations without an inverse are always
    /// fully loaded, as are contexts that do not track changes and the descendants of any load-all
    /// context.
    pub fn resolve_loading(&mut self, model: &Model) {
        for node in self.nodes.iter_mut() {
            if let ContextKind::Navigation { navigation } = node.kind {
                if model.inverse(navigation).is_none() {
                    node.load_all = true;
                }
            }
        }
        // parents always precede their children in the arena
        for i in 0..self.nodes.len() {
            let node = &self.nodes[i];
            let eager = node.load_all || !node.tracking || node.parents.iter().any(|p| self.nodes[p.0].eager);
            self.nodes[i].eager = eager;
        }
    }

    fn wrap(&mut self, parent: ContextId, kind: ContextKind) -> ContextId {
        if let Some(existing) = self.wrappers.get(&(parent, kind)) {
            return *existing;
        }
        let node = &self.nodes[parent.0];
        let tracking = match kind {
            ContextKind::ChangeTracking { tracked } => tracked,
            _ => node.tracking,
        };
        let entity_type = node.entity_type;
        let id = self.push(kind, entity_type, tracking, vec![parent]);
        self.wrappers.insert((parent, kind), id);
        id
    }

    fn push(&mut self, kind: ContextKind, entity_type: Option<EntityTypeId>, tracking: bool, parents: Vec<ContextId>) -> ContextId {
        let id = ContextId(self.nodes.len());
        for parent in &parents {
            self.nodes[parent.0].children.push(id);
        }
        self.nodes.push(ContextNode {
            id,
            kind,
            entity_type,
            tracking,
            parents,
            children: Vec::new(),
            observed: BTreeSet::new(),
            load_all: false,
            eager: false,
        });
        id
    }

    /// One line per context, for diagnostics
    pub fn describe(&self, model: &Model) -> String {
        let mut lines = Vec::with_capacity(self.nodes.len());
        for node in &self.nodes {
            let ty = node.entity_type.map(|t| model.entity_type_by_id(t).name.as_str()).unwrap_or("-");
            let kind = match node.kind {
                ContextKind::Navigation { navigation } => format!("Navigation({})", model.member(navigation).name),
                kind => format!("{:?}", kind),
            };
            let observed: Vec<&str> = node.observed.iter().map(|m| model.member(m.id()).name.as_str()).collect();
            lines.push(format!(
                "{} {} <{}> parents={:?} observes=[{}]{}{}",
                node.id,
                kind,
                ty,
                node.parents.iter().map(|p| p.0).collect::<Vec<_>>(),
                observed.join(", "),
                if node.tracking { "" } else { " untracked" },
                if node.eager { " eager" } else { "" },
            ));
        }
        lines.join("\n")
    }
}
