use rnetsync::config::{Credentials, TransactionOptions};
use rnetsync::device::DeviceIdentity;
use rnetsync::persist::FileSink;
use rnetsync::session::{SessionRecordLevel, SessionRecorder, SshDriver};
use rnetsync::transaction::{ChangeRequest, DeviceOutcome, apply_change};
use std::env;
use std::error::Error;
use std::fs;

fn print_usage() {
    eprintln!(
        "Usage: cargo run --example apply_change -- <devices.json> <change.set> [--replace <object path>] [--comment <text>] [--record <session.jsonl>] [--dry-run]"
    );
}

fn print_outcome(outcome: &DeviceOutcome) {
    println!("{} status={}", outcome.device, outcome.status);
    if let Some(kind) = outcome.error_kind {
        println!("  error_kind={kind:?}");
    }
    if let Some(backup) = &outcome.backup {
        println!("  backup={backup}");
    }
    if let Some(diff) = &outcome.diff {
        for line in diff.lines() {
            println!("  | {line}");
        }
    }
    println!("  {}", outcome.diagnostic);
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args: Vec<String> = env::args().skip(1).collect();
    if args.len() < 2 {
        print_usage();
        return Err("missing arguments".into());
    }

    let mut replace_target = None;
    let mut comment = None;
    let mut record_to = None;
    let mut dry_run = false;
    let mut rest = args.iter().skip(2);
    while let Some(flag) = rest.next() {
        match flag.as_str() {
            "--replace" => replace_target = rest.next().cloned(),
            "--comment" => comment = rest.next().cloned(),
            "--record" => record_to = rest.next().cloned(),
            "--dry-run" => dry_run = true,
            unknown => {
                print_usage();
                return Err(format!("unknown flag: {unknown}").into());
            }
        }
    }

    let devices: Vec<DeviceIdentity> = serde_json::from_str(&fs::read_to_string(&args[0])?)?;
    let text = fs::read_to_string(&args[1])?;
    let change = match replace_target {
        Some(target) => ChangeRequest::replace(args[1].clone(), text, target),
        None => ChangeRequest::merge(args[1].clone(), text),
    };
    change.validate()?;

    if dry_run {
        println!(
            "dry-run change={} mode={:?} target={:?} devices={}",
            change.name,
            change.mode,
            change.replace_target,
            devices.len()
        );
        for device in &devices {
            println!("  {device}");
        }
        return Ok(());
    }

    let mut options = TransactionOptions::default();
    if let Some(comment) = comment {
        options = options.with_comment(comment);
    }
    let credentials = Credentials::new(env::var("RNETSYNC_USER")?, env::var("RNETSYNC_PASSWORD")?);

    let recorder = SessionRecorder::new(SessionRecordLevel::KeyEventsOnly);
    let mut driver = SshDriver::juniper()?;
    if record_to.is_some() {
        driver = driver.with_recorder(recorder.clone());
    }
    let sink = FileSink::new("backups", "route_changes.log");

    let outcomes = apply_change(&driver, &devices, &credentials, &change, &options, &sink).await;
    for outcome in &outcomes {
        print_outcome(outcome);
    }

    if let Some(path) = record_to {
        fs::write(&path, recorder.to_jsonl()?)?;
        println!("session recording written to {path}");
    }

    if outcomes.iter().any(|outcome| !outcome.is_success()) {
        return Err("some devices were not changed; inspect the report above".into());
    }
    Ok(())
}
