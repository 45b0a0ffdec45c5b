//! Tiered retention for automatic backups.
//!
//! [`plan`] is a pure function: it looks only at the artifacts it is given and
//! the limits, and decides which automatic artifacts survive. Manual and safety
//! artifacts are never part of the decision.
//!
//! Each tier walks the automatic artifacts newest first:
//!
//! | Tier    | Group by             | Keeps                                        |
//! |---------|----------------------|----------------------------------------------|
//! | daily   | local calendar date  | newest per date, `max_daily` dates           |
//! | weekly  | ISO year + week      | preferred weekday if present, else newest    |
//! | monthly | year + month         | newest per month, `max_monthly` months       |
//!
//! The keep-set is the union of the tiers; every other automatic artifact is
//! pruned.

use crate::store::artifact::sort_newest_first;
use crate::store::{Artifact, ArtifactKind};
use chrono::Datelike;
use std::collections::HashMap;
use std::hash::Hash;
use tracing::debug;

/// Limits applied by [`plan`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionLimits {
    pub max_daily: u32,
    pub max_weekly: u32,
    pub max_monthly: u32,
    /// Preferred day of week for the weekly tier, 0 = Sunday.
    pub weekly_day: u32,
}

/// Which tiers selected a kept artifact.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tiers {
    pub daily: bool,
    pub weekly: bool,
    pub monthly: bool,
}

impl Tiers {
    fn any(&self) -> bool {
        self.daily || self.weekly || self.monthly
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeptArtifact {
    pub name: String,
    pub tiers: Tiers,
}

/// Outcome of a retention pass. Both lists are newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetentionPlan {
    pub keep: Vec<KeptArtifact>,
    pub prune: Vec<String>,
}

impl RetentionPlan {
    pub fn is_kept(&self, name: &str) -> bool {
        self.keep.iter().any(|k| k.name == name)
    }
}

/// Classify the automatic artifacts in `artifacts` into keep and prune sets.
pub fn plan(artifacts: &[Artifact], limits: &RetentionLimits) -> RetentionPlan {
    let mut automatic: Vec<Artifact> = artifacts
        .iter()
        .filter(|a| a.kind == ArtifactKind::Automatic)
        .cloned()
        .collect();
    sort_newest_first(&mut automatic);

    let mut tiers = vec![Tiers::default(); automatic.len()];
    for idx in first_per_group(&automatic, limits.max_daily, |a| a.modified_at.date_naive()) {
        tiers[idx].daily = true;
    }
    for idx in select_weekly(&automatic, limits.max_weekly, limits.weekly_day) {
        tiers[idx].weekly = true;
    }
    for idx in first_per_group(&automatic, limits.max_monthly, |a| {
        (a.modified_at.year(), a.modified_at.month())
    }) {
        tiers[idx].monthly = true;
    }

    let mut plan = RetentionPlan::default();
    for (artifact, tiers) in automatic.into_iter().zip(tiers) {
        if tiers.any() {
            debug!(artifact = %artifact.name, ?tiers, "Retaining backup");
            plan.keep.push(KeptArtifact {
                name: artifact.name,
                tiers,
            });
        } else {
            plan.prune.push(artifact.name);
        }
    }
    plan
}

/// Index of the first artifact of each group, for at most `limit` groups.
fn first_per_group<K, F>(automatic: &[Artifact], limit: u32, key: F) -> Vec<usize>
where
    K: Eq + Hash,
    F: Fn(&Artifact) -> K,
{
    let mut kept: HashMap<K, usize> = HashMap::new();
    for (idx, artifact) in automatic.iter().enumerate() {
        if kept.len() >= limit as usize {
            break;
        }
        kept.entry(key(artifact)).or_insert(idx);
    }
    kept.into_values().collect()
}

/// Weekly tier. A week is admitted by its newest artifact; within an admitted
/// week an older artifact on `weekly_day` replaces a kept one that is not.
fn select_weekly(automatic: &[Artifact], limit: u32, weekly_day: u32) -> Vec<usize> {
    let on_day = |a: &Artifact| a.modified_at.weekday().num_days_from_sunday() == weekly_day;

    let mut kept: HashMap<(i32, u32), usize> = HashMap::new();
    for (idx, artifact) in automatic.iter().enumerate() {
        let week = artifact.modified_at.iso_week();
        let key = (week.year(), week.week());
        match kept.get_mut(&key) {
            Some(current) => {
                if !on_day(&automatic[*current]) && on_day(artifact) {
                    *current = idx;
                }
            }
            None => {
                if kept.len() < limit as usize {
                    kept.insert(key, idx);
                }
            }
        }
    }
    kept.into_values().collect()
}
