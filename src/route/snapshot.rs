use std::collections::BTreeMap;

use log::{debug, warn};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::device::{DeviceDriver, Query, Session};
use crate::error::DeviceError;

/// What a route table says about one prefix.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
pub struct RouteEntry {
    /// Originating protocol, e.g. `BGP`, `OSPF`, `Static`, `Direct`.
    pub protocol: String,
    /// Forwarding target as printed by the device.
    pub next_hop: String,
}

impl RouteEntry {
    pub fn new(protocol: impl Into<String>, next_hop: impl Into<String>) -> Self {
        Self {
            protocol: protocol.into(),
            next_hop: next_hop.into(),
        }
    }
}

/// Prefix to entry, one entry per prefix.
pub type RouteTable = BTreeMap<String, RouteEntry>;

/// Route tables of one device at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RouteSnapshot {
    pub tables: BTreeMap<String, RouteTable>,
}

impl RouteSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_table(&mut self, name: impl Into<String>, table: RouteTable) {
        self.tables.insert(name.into(), table);
    }

    pub fn with_table(mut self, name: impl Into<String>, table: RouteTable) -> Self {
        self.insert_table(name, table);
        self
    }

    pub fn table(&self, name: &str) -> Option<&RouteTable> {
        self.tables.get(name)
    }

    pub fn route_count(&self) -> usize {
        self.tables.values().map(BTreeMap::len).sum()
    }
}

impl FromIterator<(String, RouteTable)> for RouteSnapshot {
    fn from_iter<I: IntoIterator<Item = (String, RouteTable)>>(iter: I) -> Self {
        Self {
            tables: iter.into_iter().collect(),
        }
    }
}

/// Parses terse route-table output into a [`RouteTable`].
///
/// Lines starting with `"{table}:"`, `+`, `=`, or the column header are
/// skipped, as are lines with fewer than five fields. The prefix is field 2,
/// the protocol is field 3 with brackets and the `/preference` suffix
/// removed. The next hop is field 5 when it starts with `>`, otherwise fields
/// 5 onward joined by single spaces. A prefix seen twice keeps the last line.
pub fn parse_route_table(table: &str, text: &str) -> RouteTable {
    let header = format!("{table}:");
    let mut routes = RouteTable::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty()
            || line.starts_with(&header)
            || line.starts_with('+')
            || line.starts_with('=')
            || is_column_header(line)
        {
            continue;
        }
        let parts = line.split_whitespace().collect::<Vec<_>>();
        if parts.len() < 5 {
            continue;
        }
        let prefix = parts[1];
        let protocol = parts[2]
            .trim_matches(|c| c == '[' || c == ']')
            .split('/')
            .next()
            .unwrap_or_default();
        let next_hop = if parts[4].starts_with('>') {
            parts[4].to_string()
        } else {
            parts[4..].join(" ")
        };
        routes.insert(prefix.to_string(), RouteEntry::new(protocol, next_hop));
    }
    routes
}

fn is_column_header(line: &str) -> bool {
    line.starts_with("A ") && line.contains("Destination")
}

/// Captures every table in `tables` from one device.
///
/// A table whose query fails on a healthy channel is recorded as empty. A
/// transport failure aborts the whole capture so the caller keeps its
/// previous snapshot.
pub async fn collect_snapshot<D: DeviceDriver>(
    session: &mut Session<'_, D>,
    tables: &[String],
) -> Result<RouteSnapshot, DeviceError> {
    let mut snapshot = RouteSnapshot::new();
    for table in tables {
        match session.query(Query::route_table(table)).await {
            Ok(output) => {
                let routes = parse_route_table(table, &output.as_text());
                debug!("{}: {} routes in {table}", session.device(), routes.len());
                snapshot.insert_table(table.clone(), routes);
            }
            Err(err) if err.is_transport() => return Err(err),
            Err(err) => {
                warn!(
                    "{}: failed to read {table}, recording it as empty: {err}",
                    session.device()
                );
                snapshot.insert_table(table.clone(), RouteTable::new());
            }
        }
    }
    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TERSE: &str = "\
inet.0: 5 destinations, 5 routes (5 active, 0 holddown, 0 hidden)
+ = Active Route, - = Last Active, * = Both

A V Destination        P Prf   Metric 1   Metric 2  Next hop        AS path
* 10.0.0.0/24        [BGP/170] 100 >10.0.0.1
* 10.0.1.0/24        [Direct/0] 0 >ge-0/0/0.0
* 10.0.2.1/32        [Local/0] 0 Local
* 192.0.2.0/24       [Static/5] 1 Reject route
* 10.9.9.0/24 [OSPF]
";

    #[test]
    fn parses_terse_output() {
        let routes = parse_route_table("inet.0", TERSE);
        assert_eq!(routes.len(), 4);
        assert_eq!(routes["10.0.0.0/24"], RouteEntry::new("BGP", ">10.0.0.1"));
        assert_eq!(routes["10.0.1.0/24"], RouteEntry::new("Direct", ">ge-0/0/0.0"));
        assert_eq!(routes["10.0.2.1/32"], RouteEntry::new("Local", "Local"));
        assert_eq!(routes["192.0.2.0/24"], RouteEntry::new("Static", "Reject route"));
        assert!(!routes.contains_key("10.9.9.0/24"));
    }

    #[test]
    fn later_lines_win_for_duplicate_prefixes() {
        let text = "* 10.0.0.0/24 [BGP/170] 100 >10.0.0.1\n* 10.0.0.0/24 [OSPF/10] 2 >10.0.0.2";
        let routes = parse_route_table("inet.0", text);
        assert_eq!(routes.len(), 1);
        assert_eq!(routes["10.0.0.0/24"], RouteEntry::new("OSPF", ">10.0.0.2"));
    }

    #[test]
    fn blank_output_is_an_empty_table() {
        assert!(parse_route_table("inet6.0", "\n\n").is_empty());
        assert!(parse_route_table("inet6.0", "inet6.0: 0 destinations, 0 routes").is_empty());
    }
}
