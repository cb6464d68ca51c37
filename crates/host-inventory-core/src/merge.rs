//! Priority-driven merging of duplicate hosts.
//!
//! # Algorithm
//!
//! 1. Seed the result with the group key fields.
//! 2. Order members by descending priority of their primary source
//!    (stable, unknown sources weigh 0).
//! 3. Walk members in that order; every field still unset on the result is
//!    taken from the first member that has it.
//! 4. `first_seen_at` is the earliest, `last_seen_at` the latest value
//!    across all members, independent of priority.
//! 5. `sources` is the union described by [`Provenance`].
//!
//! Single-member groups are returned unchanged.

use std::cmp::Reverse;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::models::{CanonicalHost, DuplicateGroup, HostField};

/// Fields resolved by source priority. Timestamps are resolved separately.
const PRIORITY_FIELDS: [HostField; 11] = [
    HostField::Hostname,
    HostField::LocalIp,
    HostField::ExternalIp,
    HostField::MacAddress,
    HostField::Provider,
    HostField::OsVersion,
    HostField::Platform,
    HostField::OpenPortsCount,
    HostField::VulnCount,
    HostField::OpenPorts,
    HostField::Software,
];

/// Which members end up in the merged record's `sources`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Every member of the group.
    #[default]
    AllMembers,
    /// Only members that supplied at least one field. Falls back to the
    /// highest-priority member when nobody contributed.
    Contributors,
}

/// Produces one record out of a group of duplicates.
pub trait Merger: Send + Sync {
    fn merge(&self, group: &DuplicateGroup) -> CanonicalHost;
}

/// [`Merger`] that resolves fields by configured source priority.
#[derive(Debug, Clone, Default)]
pub struct PriorityMerger {
    priorities: HashMap<String, i64>,
    provenance: Provenance,
}

impl PriorityMerger {
    pub fn new(priorities: HashMap<String, i64>) -> Self {
        Self {
            priorities,
            provenance: Provenance::default(),
        }
    }

    pub fn with_provenance(mut self, provenance: Provenance) -> Self {
        self.provenance = provenance;
        self
    }

    pub fn priority_of(&self, host: &CanonicalHost) -> i64 {
        host.primary_source()
            .and_then(|s| self.priorities.get(s))
            .copied()
            .unwrap_or(0)
    }

    fn ordered<'g>(&self, group: &'g DuplicateGroup) -> Vec<&'g CanonicalHost> {
        let mut members: Vec<&CanonicalHost> = group.members().iter().collect();
        members.sort_by_key(|m| Reverse(self.priority_of(m)));
        members
    }
}

impl Merger for PriorityMerger {
    fn merge(&self, group: &DuplicateGroup) -> CanonicalHost {
        if !group.is_duplicate() {
            return group.members()[0].clone();
        }
        tracing::info!(key = %group.key(), members = group.len(), "merging group");

        let mut merged = CanonicalHost::default();
        let mut resolved: Vec<HostField> = Vec::with_capacity(PRIORITY_FIELDS.len());
        for (field, value) in group.key().entries() {
            field.set_text(&mut merged, value.clone());
            resolved.push(*field);
        }

        let ordered = self.ordered(group);
        for member in &ordered {
            let mut contributed = false;
            for field in PRIORITY_FIELDS {
                if resolved.contains(&field) || !field.is_set_on(member) {
                    continue;
                }
                field.copy_value(member, &mut merged);
                resolved.push(field);
                contributed = true;
            }
            if contributed || self.provenance == Provenance::AllMembers {
                merged.sources.extend(member.sources.iter().cloned());
            }
        }
        if merged.sources.is_empty() {
            merged.sources = ordered[0].sources.clone();
        }

        merged.first_seen_at = group.members().iter().filter_map(|m| m.first_seen_at).min();
        merged.last_seen_at = group.members().iter().filter_map(|m| m.last_seen_at).max();
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{GroupKey, OpenPort};
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeSet;

    const KEY: [HostField; 1] = [HostField::LocalIp];

    fn host(source: &str, hostname: Option<&str>) -> CanonicalHost {
        let mut h = CanonicalHost::from_source(source);
        h.local_ip = Some("10.0.0.1".into());
        h.hostname = hostname.map(str::to_string);
        h
    }

    fn group(members: Vec<CanonicalHost>) -> DuplicateGroup {
        DuplicateGroup::new(GroupKey::of(&members[0], &KEY), members).unwrap()
    }

    fn merger() -> PriorityMerger {
        PriorityMerger::new(HashMap::from([
            ("sourceX".to_string(), 10),
            ("sourceY".to_string(), 5),
        ]))
    }

    #[test]
    fn higher_priority_source_wins_a_field() {
        let g = group(vec![host("sourceY", Some("from-y")), host("sourceX", Some("from-x"))]);
        let merged = merger().merge(&g);
        assert_eq!(merged.hostname.as_deref(), Some("from-x"));
        assert_eq!(merged.local_ip.as_deref(), Some("10.0.0.1"));
    }

    #[test]
    fn lower_priority_fills_gaps_only() {
        let mut y = host("sourceY", Some("from-y"));
        y.platform = Some("Linux".into());
        y.open_ports.insert(OpenPort {
            port: 22,
            protocol: "TCP".into(),
            service_name: None,
        });
        let mut x = host("sourceX", None);
        x.os_version = Some("Ubuntu 22.04".into());

        let merged = merger().merge(&group(vec![x, y]));
        assert_eq!(merged.hostname.as_deref(), Some("from-y"));
        assert_eq!(merged.platform.as_deref(), Some("Linux"));
        assert_eq!(merged.os_version.as_deref(), Some("Ubuntu 22.04"));
        assert_eq!(merged.open_ports.len(), 1);
    }

    #[test]
    fn key_fields_are_never_overwritten() {
        let key = GroupKey::new(vec![(HostField::Hostname, None)]);
        let g = DuplicateGroup::new(
            key,
            vec![host("sourceX", Some("named")), host("sourceY", None)],
        )
        .unwrap();
        let merged = merger().merge(&g);
        assert_eq!(merged.hostname, None);
    }

    #[test]
    fn ties_keep_original_order() {
        let g = group(vec![host("unknown-a", Some("first")), host("unknown-b", Some("second"))]);
        assert_eq!(merger().merge(&g).hostname.as_deref(), Some("first"));
    }

    #[test]
    fn timestamps_take_extremes_regardless_of_priority() {
        let mut x = host("sourceX", Some("x"));
        x.first_seen_at = Some(Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap());
        x.last_seen_at = Some(Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap());
        let mut y = host("sourceY", Some("y"));
        y.first_seen_at = Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let z = host("sourceZ", None);

        let merged = merger().merge(&group(vec![x, y, z]));
        assert_eq!(
            merged.first_seen_at,
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(
            merged.last_seen_at,
            Some(Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn all_members_provenance_includes_silent_members() {
        let g = group(vec![host("sourceX", Some("x")), host("sourceY", Some("y"))]);
        let merged = merger().merge(&g);
        assert_eq!(
            merged.sources,
            BTreeSet::from(["sourceX".to_string(), "sourceY".to_string()])
        );
    }

    #[test]
    fn contributor_provenance_drops_silent_members() {
        let g = group(vec![host("sourceX", Some("x")), host("sourceY", Some("y"))]);
        let merged = merger().with_provenance(Provenance::Contributors).merge(&g);
        assert_eq!(merged.sources, BTreeSet::from(["sourceX".to_string()]));
    }

    #[test]
    fn contributor_provenance_is_never_empty() {
        let g = group(vec![host("sourceY", None), host("sourceX", None)]);
        let merged = merger().with_provenance(Provenance::Contributors).merge(&g);
        assert_eq!(merged.sources, BTreeSet::from(["sourceX".to_string()]));
    }

    #[test]
    fn single_member_group_is_identity() {
        let mut only = host("sourceY", Some("solo"));
        only.id = Some("keep-me".into());
        let g = group(vec![only.clone()]);
        assert_eq!(merger().merge(&g), only);
    }

    #[test]
    fn sources_and_timestamps_commute_under_reordering() {
        let mut a = host("sourceX", Some("a"));
        a.first_seen_at = Some(Utc.with_ymd_and_hms(2023, 5, 1, 0, 0, 0).unwrap());
        let mut b = host("sourceY", Some("b"));
        b.last_seen_at = Some(Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap());
        let c = host("other", None);

        let m1 = merger().merge(&group(vec![a.clone(), b.clone(), c.clone()]));
        let m2 = merger().merge(&group(vec![c, b, a]));
        assert_eq!(m1.sources, m2.sources);
        assert_eq!(m1.first_seen_at, m2.first_seen_at);
        assert_eq!(m1.last_seen_at, m2.last_seen_at);
        assert_eq!(m1, m2);
    }
}
