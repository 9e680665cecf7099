use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityTypeId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MemberId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Cardinality {
    One,
    Many,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationDef {
    pub target: EntityTypeId,
    pub cardinality: Cardinality,
    /// Required for any navigation whose changes must be propagated backward
    pub inverse: Option<MemberId>,
    /// Realised through join rows rather than a foreign key
    pub many_to_many: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemberKind {
    Property,
    Navigation(NavigationDef),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberDef {
    pub id: MemberId,
    pub name: String,
    pub declaring_type: EntityTypeId,
    pub kind: MemberKind,
}

impl MemberDef {
    pub fn navigation(&self) -> Option<&NavigationDef> {
        match &self.kind {
            MemberKind::Navigation(nav) => Some(nav),
            MemberKind::Property => None,
        }
    }

    pub fn observed(&self) -> ObservedMember {
        match self.kind {
            MemberKind::Property => ObservedMember::Property(self.id),
            MemberKind::Navigation(_) => ObservedMember::Navigation(self.id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityTypeDef {
    pub id: EntityTypeId,
    pub name: String,
    pub members: Vec<MemberId>,
}

/// A member read that change detection is attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObservedMember {
    Property(MemberId),
    Navigation(MemberId),
}

impl ObservedMember {
    pub fn id(&self) -> MemberId {
        match self {
            ObservedMember::Property(id) | ObservedMember::Navigation(id) => *id,
        }
    }
}

/// Entity and member metadata. Ids are dense indexes minted by [`ModelBuilder`], so lookups by id
/// on ids from a different model are a programming error.
#[derive(Debug, Clone, Default)]
pub struct Model {
    types: Vec<EntityTypeDef>,
    members: Vec<MemberDef>,
    type_names: HashMap<String, EntityTypeId>,
}

impl Model {
    pub fn builder() -> ModelBuilder { ModelBuilder::default() }

    pub fn entity_type(&self, name: &str) -> Option<&EntityTypeDef> { self.type_names.get(name).map(|id| &self.types[id.0 as usize]) }

    pub fn entity_type_by_id(&self, id: EntityTypeId) -> &EntityTypeDef { &self.types[id.0 as usize] }

    pub fn member(&self, id: MemberId) -> &MemberDef { &self.members[id.0 as usize] }

    pub fn member_by_name(&self, entity_type: EntityTypeId, name: &str) -> Option<&MemberDef> {
        self.types.get(entity_type.0 as usize)?.members.iter().map(|id| self.member(*id)).find(|m| m.name == name)
    }

    pub fn navigation(&self, id: MemberId) -> Option<&NavigationDef> { self.member(id).navigation() }

    pub fn inverse(&self, id: MemberId) -> Option<MemberId> { self.navigation(id)?.inverse }

    pub fn members(&self) -> impl Iterator<Item = &MemberDef> { self.members.iter() }

    pub fn entity_types(&self) -> impl Iterator<Item = &EntityTypeDef> { self.types.iter() }

    /// `Type.member`, for diagnostics
    pub fn qualified_name(&self, id: MemberId) -> String {
        let member = self.member(id);
        format!("{}.{}", self.entity_type_by_id(member.declaring_type).name, member.name)
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Model({} types, {} members)", self.types.len(), self.members.len())
    }
}

/// Incrementally declares entity types and their members.
///
/// ```
/// use rollup_core::model::{Cardinality, Model};
/// let mut builder = Model::builder();
/// let person = builder.entity("Person");
/// let pet = builder.entity("Pet");
/// builder.property(person, "name");
/// let (pets, owner) = builder.relationship(person, "pets", Cardinality::Many, pet, "owner", Cardinality::One);
/// let model = builder.build();
/// assert_eq!(model.inverse(pets), Some(owner));
/// ```
#[derive(Debug, Default)]
pub struct ModelBuilder {
    model: Model,
}

impl ModelBuilder {
    pub fn entity(&mut self, name: &str) -> EntityTypeId {
        if let Some(existing) = self.model.type_names.get(name) {
            return *existing;
        }
        let id = EntityTypeId(self.model.types.len() as u32);
        self.model.types.push(EntityTypeDef { id, name: name.to_string(), members: Vec::new() });
        self.model.type_names.insert(name.to_string(), id);
        id
    }

    pub fn property(&mut self, owner: EntityTypeId, name: &str) -> MemberId { self.push_member(owner, name, MemberKind::Property) }

    /// Declare a navigation with no inverse. Changes to it can only be observed through `untracked` reads.
    pub fn navigation(&mut self, owner: EntityTypeId, name: &str, cardinality: Cardinality, target: EntityTypeId) -> MemberId {
        let kind = MemberKind::Navigation(NavigationDef { target, cardinality, inverse: None, many_to_many: cardinality == Cardinality::Many });
        self.push_member(owner, name, kind)
    }

    /// Declare a navigation together with its inverse. Returns `(navigation, inverse)`.
    pub fn relationship(
        &mut self,
        owner: EntityTypeId,
        name: &str,
        cardinality: Cardinality,
        target: EntityTypeId,
        inverse_name: &str,
        inverse_cardinality: Cardinality,
    ) -> (MemberId, MemberId) {
        let many_to_many = cardinality == Cardinality::Many && inverse_cardinality == Cardinality::Many;
        let forward = self.push_member(
            owner,
            name,
            MemberKind::Navigation(NavigationDef { target, cardinality, inverse: None, many_to_many }),
        );
        let inverse = self.push_member(
            target,
            inverse_name,
            MemberKind::Navigation(NavigationDef { target: owner, cardinality: inverse_cardinality, inverse: Some(forward), many_to_many }),
        );
        if let MemberKind::Navigation(nav) = &mut self.model.members[forward.0 as usize].kind {
            nav.inverse = Some(inverse);
        }
        (forward, inverse)
    }

    pub fn build(self) -> Model { self.model }

    fn push_member(&mut self, owner: EntityTypeId, name: &str, kind: MemberKind) -> MemberId {
        let id = MemberId(self.model.members.len() as u32);
        self.model.members.push(MemberDef { id, name: name.to_string(), declaring_type: owner, kind });
        self.model.types[owner.0 as usize].members.push(id);
        id
    }
}
