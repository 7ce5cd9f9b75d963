//! Presentation order for merged skills.
//!
//! Local skills come first, then skills by stars descending, then by name.
//! The sort is stable, so skills with equal keys keep the order in which
//! their sources contributed them.

use std::cmp::Ordering;

use crate::types::ExternalSkill;

/// Sort `skills` into federated presentation order.
pub fn sort_skills(skills: &mut [ExternalSkill]) {
    skills.sort_by(compare);
}

fn compare(a: &ExternalSkill, b: &ExternalSkill) -> Ordering {
    b.source
        .is_local()
        .cmp(&a.source.is_local())
        .then_with(|| b.stars.unwrap_or(0).cmp(&a.stars.unwrap_or(0)))
        .then_with(|| a.name.cmp(&b.name))
}
