//! Change detection for a single observed member.

use std::collections::HashSet;

use crate::changeset::{Changeset, MemberChange};
use crate::entity::Entity;
use crate::incremental::IncrementalContext;
use crate::model::{Model, ObservedMember};

/// Entities of the member's declaring type whose value of `member` may differ between the two sides.
///
/// Properties: entities that were added, removed or had the field modified. Navigations: entities
/// whose navigation changed structurally, plus the entities that inverse changes point at (join row
/// changes were already recorded in both directions when the changeset was captured). Related
/// entities seen along the way are recorded in `incremental` and, like every entity with a changed
/// field, marked load-all.
pub fn affected_by_member(member: ObservedMember, changeset: &Changeset, model: &Model, incremental: &IncrementalContext) -> HashSet<Entity> {
    let def = model.member(member.id());
    let mut affected = HashSet::new();

    for (entity, _) in changeset.structural() {
        if entity.ty == def.declaring_type {
            incremental.mark_load_all(entity);
            affected.insert(entity);
        }
    }

    match member {
        ObservedMember::Property(property) => {
            for (entity, _) in changeset.changes_of(property) {
                incremental.mark_load_all(entity);
                affected.insert(entity);
            }
        }
        ObservedMember::Navigation(navigation) => {
            for (entity, change) in changeset.changes_of(navigation) {
                if let MemberChange::Navigation { added, removed } = change {
                    for related in added.iter().chain(removed.iter()) {
                        incremental.mark_load_all(*related);
                    }
                    incremental.record_all(entity, navigation, added.into_iter().chain(removed));
                    affected.insert(entity);
                }
            }
            if let Some(inverse) = model.inverse(navigation) {
                for (related, change) in changeset.changes_of(inverse) {
                    if let MemberChange::Navigation { added, removed } = change {
                        for owner in added.into_iter().chain(removed) {
                            incremental.record(owner, navigation, related);
                            affected.insert(owner);
                        }
                        incremental.mark_load_all(related);
                    }
                }
            }
        }
    }
    affected
}
