use anyhow::{Context, bail};
use rnetsync::config::{Credentials, MonitorOptions};
use rnetsync::device::DeviceIdentity;
use rnetsync::persist::FileSink;
use rnetsync::route::run_route_reconciliation;
use rnetsync::session::SshDriver;
use std::env;
use std::fs;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn print_usage() {
    eprintln!(
        "Usage: cargo run --example route_watch -- <devices.json> [--interval <secs>] [--table <name>]... [--log <file>]"
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().skip(1).collect();
    let Some(inventory) = args.first() else {
        print_usage();
        bail!("missing device inventory");
    };

    let mut options = MonitorOptions::default();
    let mut tables = Vec::new();
    let mut change_log = "route_changes.log".to_string();
    let mut rest = args.iter().skip(1);
    while let Some(flag) = rest.next() {
        let value = rest
            .next()
            .with_context(|| format!("flag {flag} needs a value"))?;
        match flag.as_str() {
            "--interval" => {
                let secs: u64 = value.parse().context("interval must be whole seconds")?;
                options = options.with_interval(Duration::from_secs(secs));
            }
            "--table" => tables.push(value.clone()),
            "--log" => change_log = value.clone(),
            unknown => {
                print_usage();
                bail!("unknown flag: {unknown}");
            }
        }
    }
    if !tables.is_empty() {
        options = options.with_tables(tables);
    }

    let devices: Vec<DeviceIdentity> = serde_json::from_str(
        &fs::read_to_string(inventory).with_context(|| format!("reading {inventory}"))?,
    )
    .with_context(|| format!("parsing {inventory}"))?;
    let credentials = Credentials::new(
        env::var("RNETSYNC_USER").context("RNETSYNC_USER is not set")?,
        env::var("RNETSYNC_PASSWORD").context("RNETSYNC_PASSWORD is not set")?,
    );

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("interrupt received, stopping after the current cycle");
            on_signal.cancel();
        }
    });

    let driver = SshDriver::juniper()?;
    let sink = FileSink::new("backups", change_log);
    println!(
        "watching {} device(s), tables {:?}, every {}s",
        devices.len(),
        options.tables,
        options.interval().as_secs()
    );
    let summary =
        run_route_reconciliation(&driver, &devices, &credentials, options, &sink, cancel).await?;

    println!(
        "cycles={} changes_logged={} collection_failures={}",
        summary.cycles, summary.changes_logged, summary.collection_failures
    );
    Ok(())
}
