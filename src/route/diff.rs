use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::snapshot::{RouteEntry, RouteSnapshot, RouteTable};

/// A prefix that appeared or disappeared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteChange {
    pub prefix: String,
    pub entry: RouteEntry,
}

/// A prefix whose entry changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteUpdate {
    pub prefix: String,
    pub old: RouteEntry,
    pub new: RouteEntry,
}

/// Table name, then protocol, then the changed routes in prefix order.
pub type Grouped<T> = BTreeMap<String, BTreeMap<String, Vec<T>>>;

/// Difference between two route snapshots.
///
/// Only tables present in both snapshots contribute prefix-level changes.
/// Tables present on one side only are reported whole in
/// [`ChangeSet::tables_added`] and [`ChangeSet::tables_removed`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub new: Grouped<RouteChange>,
    pub updated: Grouped<RouteUpdate>,
    pub removed: Grouped<RouteChange>,
    pub tables_added: BTreeMap<String, RouteTable>,
    pub tables_removed: BTreeMap<String, RouteTable>,
}

/// Change counts of one table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeCounts {
    pub new: usize,
    pub updated: usize,
    pub removed: usize,
}

impl ChangeCounts {
    pub fn total(&self) -> usize {
        self.new + self.updated + self.removed
    }
}

fn count<T>(groups: &BTreeMap<String, Vec<T>>) -> usize {
    groups.values().map(Vec::len).sum()
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.new.is_empty()
            && self.updated.is_empty()
            && self.removed.is_empty()
            && self.tables_added.is_empty()
            && self.tables_removed.is_empty()
    }

    /// Per-table counts of prefix-level changes.
    pub fn counts(&self) -> BTreeMap<String, ChangeCounts> {
        let mut counts: BTreeMap<String, ChangeCounts> = BTreeMap::new();
        for (table, groups) in &self.new {
            counts.entry(table.clone()).or_default().new = count(groups);
        }
        for (table, groups) in &self.updated {
            counts.entry(table.clone()).or_default().updated = count(groups);
        }
        for (table, groups) in &self.removed {
            counts.entry(table.clone()).or_default().removed = count(groups);
        }
        counts
    }

    /// Counts keyed by `(table, protocol)`.
    pub fn counts_by_protocol(&self) -> BTreeMap<(String, String), ChangeCounts> {
        let mut counts: BTreeMap<(String, String), ChangeCounts> = BTreeMap::new();
        for (table, groups) in &self.new {
            for (protocol, routes) in groups {
                counts.entry((table.clone(), protocol.clone())).or_default().new = routes.len();
            }
        }
        for (table, groups) in &self.updated {
            for (protocol, routes) in groups {
                counts.entry((table.clone(), protocol.clone())).or_default().updated = routes.len();
            }
        }
        for (table, groups) in &self.removed {
            for (protocol, routes) in groups {
                counts.entry((table.clone(), protocol.clone())).or_default().removed = routes.len();
            }
        }
        counts
    }

    /// Prefix-level changes plus the routes of added and removed tables.
    pub fn total_changes(&self) -> usize {
        self.counts().values().map(ChangeCounts::total).sum::<usize>()
            + self.tables_added.values().map(BTreeMap::len).sum::<usize>()
            + self.tables_removed.values().map(BTreeMap::len).sum::<usize>()
    }
}

fn push<T>(groups: &mut Grouped<T>, table: &str, protocol: &str, item: T) {
    groups
        .entry(table.to_string())
        .or_default()
        .entry(protocol.to_string())
        .or_default()
        .push(item);
}

/// Computes what changed from `old` to `new`.
///
/// New and removed routes are grouped by their own protocol, updated routes
/// by the new protocol. Prefix order inside each group follows the tables'
/// sorted order, so the result is deterministic.
pub fn diff(old: &RouteSnapshot, new: &RouteSnapshot) -> ChangeSet {
    let mut changes = ChangeSet::default();

    for (table, new_routes) in &new.tables {
        let Some(old_routes) = old.tables.get(table) else {
            changes.tables_added.insert(table.clone(), new_routes.clone());
            continue;
        };

        for (prefix, entry) in new_routes {
            match old_routes.get(prefix) {
                None => push(
                    &mut changes.new,
                    table,
                    &entry.protocol,
                    RouteChange {
                        prefix: prefix.clone(),
                        entry: entry.clone(),
                    },
                ),
                Some(previous) if previous != entry => push(
                    &mut changes.updated,
                    table,
                    &entry.protocol,
                    RouteUpdate {
                        prefix: prefix.clone(),
                        old: previous.clone(),
                        new: entry.clone(),
                    },
                ),
                Some(_) => {}
            }
        }

        for (prefix, entry) in old_routes {
            if !new_routes.contains_key(prefix) {
                push(
                    &mut changes.removed,
                    table,
                    &entry.protocol,
                    RouteChange {
                        prefix: prefix.clone(),
                        entry: entry.clone(),
                    },
                );
            }
        }
    }

    for (table, old_routes) in &old.tables {
        if !new.tables.contains_key(table) {
            changes.tables_removed.insert(table.clone(), old_routes.clone());
        }
    }

    changes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(routes: &[(&str, &str, &str)]) -> RouteTable {
        routes
            .iter()
            .map(|(prefix, protocol, hop)| (prefix.to_string(), RouteEntry::new(*protocol, *hop)))
            .collect()
    }

    fn snapshot(tables: &[(&str, RouteTable)]) -> RouteSnapshot {
        tables
            .iter()
            .map(|(name, routes)| (name.to_string(), routes.clone()))
            .collect()
    }

    #[test]
    fn identical_snapshots_have_no_changes() {
        let s = snapshot(&[(
            "inet.0",
            table(&[("10.0.0.0/24", "BGP", ">10.0.0.1"), ("10.0.1.0/24", "OSPF", ">10.0.0.2")]),
        )]);
        let changes = diff(&s, &s.clone());
        assert!(changes.is_empty());
        assert_eq!(changes.total_changes(), 0);
    }

    #[test]
    fn detects_new_updated_and_removed_prefixes() {
        let old = snapshot(&[(
            "inet.0",
            table(&[("10.0.0.0/24", "BGP", ">10.0.0.1"), ("10.0.1.0/24", "OSPF", ">10.0.0.2")]),
        )]);
        let new = snapshot(&[(
            "inet.0",
            table(&[("10.0.0.0/24", "BGP", ">10.0.0.9"), ("10.0.2.0/24", "Static", ">10.0.0.3")]),
        )]);

        let changes = diff(&old, &new);
        assert_eq!(changes.new["inet.0"]["Static"][0].prefix, "10.0.2.0/24");
        let update = &changes.updated["inet.0"]["BGP"][0];
        assert_eq!(update.prefix, "10.0.0.0/24");
        assert_eq!(update.old.next_hop, ">10.0.0.1");
        assert_eq!(update.new.next_hop, ">10.0.0.9");
        assert_eq!(changes.removed["inet.0"]["OSPF"][0].prefix, "10.0.1.0/24");
        assert_eq!(
            changes.counts()["inet.0"],
            ChangeCounts {
                new: 1,
                updated: 1,
                removed: 1
            }
        );
    }

    #[test]
    fn next_hop_change_and_connected_route_are_classified() {
        let old = snapshot(&[("inet.0", table(&[("10.0.0.0/24", "BGP", "10.0.0.1")]))]);
        let new = snapshot(&[(
            "inet.0",
            table(&[("10.0.0.0/24", "BGP", "10.0.0.2"), ("10.0.1.0/24", "Direct", "-")]),
        )]);

        let changes = diff(&old, &new);
        assert_eq!(
            changes.updated["inet.0"]["BGP"],
            vec![RouteUpdate {
                prefix: "10.0.0.0/24".to_string(),
                old: RouteEntry::new("BGP", "10.0.0.1"),
                new: RouteEntry::new("BGP", "10.0.0.2"),
            }]
        );
        assert_eq!(
            changes.new["inet.0"]["Direct"],
            vec![RouteChange {
                prefix: "10.0.1.0/24".to_string(),
                entry: RouteEntry::new("Direct", "-"),
            }]
        );
        assert_eq!(changes.new["inet.0"].len(), 1);
        assert!(changes.removed.is_empty());
        assert!(changes.tables_added.is_empty() && changes.tables_removed.is_empty());
    }

    #[test]
    fn protocol_change_groups_update_under_new_protocol() {
        let old = snapshot(&[("inet.0", table(&[("10.0.0.0/24", "OSPF", ">10.0.0.1")]))]);
        let new = snapshot(&[("inet.0", table(&[("10.0.0.0/24", "BGP", ">10.0.0.1")]))]);
        let changes = diff(&old, &new);
        assert!(changes.updated["inet.0"].contains_key("BGP"));
        assert!(!changes.updated["inet.0"].contains_key("OSPF"));
        let by_protocol = changes.counts_by_protocol();
        assert_eq!(by_protocol.len(), 1);
        assert_eq!(by_protocol[&("inet.0".to_string(), "BGP".to_string())].updated, 1);
    }

    #[test]
    fn empty_baseline_table_reports_everything_new() {
        let old = snapshot(&[("inet.0", RouteTable::new())]);
        let new = snapshot(&[(
            "inet.0",
            table(&[
                ("10.0.0.0/24", "BGP", ">10.0.0.1"),
                ("10.0.1.0/24", "BGP", ">10.0.0.1"),
                ("10.0.2.0/24", "OSPF", ">10.0.0.2"),
            ]),
        )]);
        let changes = diff(&old, &new);
        assert_eq!(changes.new["inet.0"]["BGP"].len(), 2);
        assert_eq!(changes.new["inet.0"]["OSPF"].len(), 1);
        assert!(changes.updated.is_empty() && changes.removed.is_empty());
    }

    #[test]
    fn one_sided_tables_are_reported_whole() {
        let old = snapshot(&[
            ("inet.0", RouteTable::new()),
            ("inet6.0", table(&[("2001:db8::/32", "BGP", ">fe80::1")])),
        ]);
        let new = snapshot(&[
            ("inet.0", RouteTable::new()),
            ("mpls.0", table(&[("299776", "RSVP", ">10.1.1.1")])),
        ]);
        let changes = diff(&old, &new);
        assert!(changes.new.is_empty());
        assert!(changes.removed.is_empty());
        assert!(changes.tables_added.contains_key("mpls.0"));
        assert!(changes.tables_removed.contains_key("inet6.0"));
        assert!(!changes.is_empty());
        assert_eq!(changes.total_changes(), 2);
    }
}
