use std::fmt::Write as _;

use chrono::{DateTime, Local};

use super::diff::{ChangeSet, Grouped, RouteChange};
use super::snapshot::RouteEntry;
use crate::device::DeviceIdentity;

/// Timestamp layout of the change-log header.
pub const REPORT_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

fn describe(entry: &RouteEntry) -> String {
    format!("{} via {}", entry.protocol, entry.next_hop)
}

fn write_changes(out: &mut String, title: &str, table: &str, groups: &Grouped<RouteChange>) {
    let Some(protocols) = groups.get(table).filter(|p| !p.is_empty()) else {
        return;
    };
    let _ = writeln!(out, "\n{title} Prefixes in {table}:");
    for (protocol, routes) in protocols {
        let _ = writeln!(out, "  {protocol}: {} subnets changed", routes.len());
        for route in routes {
            let _ = writeln!(out, "    {} - {}", route.prefix, describe(&route.entry));
        }
    }
}

/// Renders a change set as the human-readable change-log block.
///
/// Returns an empty string for an empty change set.
pub fn render_change_report(
    device: &DeviceIdentity,
    recorded_at: &DateTime<Local>,
    changes: &ChangeSet,
) -> String {
    if changes.is_empty() {
        return String::new();
    }

    let mut out = String::new();
    let _ = writeln!(
        out,
        "\n=== Route Changes at {} ===",
        recorded_at.format(REPORT_TIME_FORMAT)
    );
    let _ = writeln!(out, "Device: {} ({})", device.name, device.address);
    let _ = writeln!(
        out,
        "Location: {}, Function: {}, Product: {}",
        device.location.as_deref().unwrap_or("-"),
        device.function.as_deref().unwrap_or("-"),
        device.product_family.as_deref().unwrap_or("-"),
    );

    let mut tables = changes
        .new
        .keys()
        .chain(changes.updated.keys())
        .chain(changes.removed.keys())
        .collect::<Vec<_>>();
    tables.sort();
    tables.dedup();

    for table in tables {
        write_changes(&mut out, "New", table, &changes.new);
        if let Some(protocols) = changes.updated.get(table).filter(|p| !p.is_empty()) {
            let _ = writeln!(out, "\nUpdated Prefixes in {table}:");
            for (protocol, routes) in protocols {
                let _ = writeln!(out, "  {protocol}: {} subnets changed", routes.len());
                for route in routes {
                    let _ = writeln!(
                        out,
                        "    {} - Old: {} | New: {}",
                        route.prefix,
                        describe(&route.old),
                        describe(&route.new)
                    );
                }
            }
        }
        write_changes(&mut out, "Removed", table, &changes.removed);
    }

    for (table, routes) in &changes.tables_added {
        let _ = writeln!(out, "\nNew Table {table}: {} routes", routes.len());
    }
    for (table, routes) in &changes.tables_removed {
        let _ = writeln!(out, "\nRemoved Table {table}: {} routes", routes.len());
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::{RouteSnapshot, RouteTable, diff};
    use chrono::TimeZone;

    fn single(prefix: &str, protocol: &str, hop: &str) -> RouteTable {
        [(prefix.to_string(), RouteEntry::new(protocol, hop))]
            .into_iter()
            .collect()
    }

    #[test]
    fn report_follows_change_log_layout() {
        let device = DeviceIdentity::new("edge1", "10.0.0.1").with_site("DC1", "border", "MX");
        let old = RouteSnapshot::new().with_table("inet.0", single("10.0.0.0/24", "BGP", ">10.0.0.1"));
        let new = RouteSnapshot::new()
            .with_table("inet.0", single("10.0.1.0/24", "Direct", ">ge-0/0/0.0"));
        let at = Local.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();

        let report = render_change_report(&device, &at, &diff(&old, &new));
        let expected = "
=== Route Changes at 2024-05-01 12:30:00 ===
Device: edge1 (10.0.0.1)
Location: DC1, Function: border, Product: MX

New Prefixes in inet.0:
  Direct: 1 subnets changed
    10.0.1.0/24 - Direct via >ge-0/0/0.0

Removed Prefixes in inet.0:
  BGP: 1 subnets changed
    10.0.0.0/24 - BGP via >10.0.0.1
";
        assert_eq!(report, expected);
    }

    #[test]
    fn updated_routes_show_old_and_new() {
        let device = DeviceIdentity::new("edge1", "10.0.0.1");
        let old = RouteSnapshot::new().with_table("inet.0", single("10.0.0.0/24", "BGP", ">10.0.0.1"));
        let new = RouteSnapshot::new().with_table("inet.0", single("10.0.0.0/24", "BGP", ">10.0.0.9"));
        let report = render_change_report(&device, &Local::now(), &diff(&old, &new));
        assert!(report.contains("Location: -, Function: -, Product: -"));
        assert!(report.contains(
            "    10.0.0.0/24 - Old: BGP via >10.0.0.1 | New: BGP via >10.0.0.9"
        ));
    }

    #[test]
    fn empty_change_set_renders_nothing() {
        let device = DeviceIdentity::new("edge1", "10.0.0.1");
        let snapshot = RouteSnapshot::new().with_table("inet.0", RouteTable::new());
        assert!(render_change_report(&device, &Local::now(), &diff(&snapshot, &snapshot)).is_empty());
    }
}
