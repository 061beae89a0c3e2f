//! Snapshot CLI Tool
//!
//! Command-line interface for inspecting snapshot files offline: diffing
//! two snapshots, resolving a stream's effective rules, and printing a
//! snapshot digest.

use anyhow::{anyhow, bail, Context};
use serde::Serialize;
use std::fs;
use std::path::PathBuf;
use std::process;
use streamkeeper_core::{build_hierarchy, Snapshot, SnapshotDiff, StreamPath};

/// JSON output for the rules command
#[derive(Debug, Serialize)]
struct RulesOutput {
    stream: String,
    local: Vec<String>,
    inherited: Vec<String>,
}

/// JSON output for the digest command
#[derive(Debug, Serialize)]
struct DigestOutput {
    digest: String,
    stream_count: usize,
    tracks_parents: bool,
}

fn load_snapshot(path: &PathBuf) -> anyhow::Result<Snapshot> {
    let bytes = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    Snapshot::from_slice(&bytes).with_context(|| format!("Failed to parse {}", path.display()))
}

fn print_diff(diff: &SnapshotDiff) {
    if diff.is_empty() {
        println!("No rule changes");
        return;
    }
    for rule in &diff.added {
        println!("+ {}", rule);
    }
    for rule in &diff.removed {
        println!("- {}", rule);
    }
    for (old, new) in &diff.modified {
        println!("~ {}", old);
        println!("  => {}", new);
    }
}

fn cmd_diff(
    from: PathBuf,
    to: PathBuf,
    stream: Option<StreamPath>,
    json: bool,
) -> anyhow::Result<()> {
    let older = load_snapshot(&from)?;
    let newer = load_snapshot(&to)?;

    let diff = match &stream {
        Some(stream) => older.diff_stream(&newer, stream),
        None => older.diff(&newer),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&diff)?);
    } else {
        print_diff(&diff);
    }
    Ok(())
}

fn cmd_rules(snapshot_path: PathBuf, stream: StreamPath, json: bool) -> anyhow::Result<()> {
    let snapshot = load_snapshot(&snapshot_path)?;

    // Walk up the recorded parents to find the top of the hierarchy
    let mut root = stream.clone();
    let mut hops = 0;
    while let Some(Some(parent)) = snapshot.parent_of(&root) {
        if snapshot.rules_for(parent).is_none() || hops > snapshot.stream_count() {
            break;
        }
        root = parent.clone();
        hops += 1;
    }

    let hierarchy = build_hierarchy(&snapshot, &root)?;
    let resolver = hierarchy.resolver();
    let local = resolver.local_rules(&stream)?;
    let inherited = resolver.inherited_rules(&stream)?;

    if json {
        let output = RulesOutput {
            stream: stream.to_string(),
            local: local.iter().map(|r| r.rule.to_string()).collect(),
            inherited: inherited.iter().map(|r| r.rule.to_string()).collect(),
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("Stream: {}", stream);
        println!("Local rules ({}):", local.len());
        for resolved in &local {
            println!("    {}", resolved.rule);
        }
        println!("Inherited rules ({}):", inherited.len());
        for resolved in &inherited {
            println!("    {}", resolved.rule);
        }
    }
    Ok(())
}

fn cmd_digest(snapshot_path: PathBuf, json: bool) -> anyhow::Result<()> {
    let snapshot = load_snapshot(&snapshot_path)?;
    let output = DigestOutput {
        digest: snapshot.digest(),
        stream_count: snapshot.stream_count(),
        tracks_parents: snapshot.parents_by_stream().is_some(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("Digest: {}", output.digest);
        println!("Streams: {}", output.stream_count);
        println!("Parent tracking: {}", output.tracks_parents);
    }
    Ok(())
}

/// Parsed `--flag value` pairs plus boolean switches.
#[derive(Default)]
struct Flags {
    from: Option<PathBuf>,
    to: Option<PathBuf>,
    snapshot: Option<PathBuf>,
    stream: Option<StreamPath>,
    json: bool,
}

fn parse_flags(args: &[String]) -> anyhow::Result<Flags> {
    let mut flags = Flags::default();
    let mut i = 0;
    while i < args.len() {
        let flag = args[i].as_str();
        let mut value = || {
            i += 1;
            args.get(i)
                .cloned()
                .ok_or_else(|| anyhow!("Missing value for {}", flag))
        };
        match flag {
            "--from" | "-f" => flags.from = Some(PathBuf::from(value()?)),
            "--to" | "-t" => flags.to = Some(PathBuf::from(value()?)),
            "--snapshot" | "-s" => flags.snapshot = Some(PathBuf::from(value()?)),
            "--stream" => flags.stream = Some(StreamPath::new(value()?)),
            "--json" => flags.json = true,
            other => bail!("Unknown option: {}", other),
        }
        i += 1;
    }
    Ok(flags)
}

fn run(command: &str, args: &[String]) -> anyhow::Result<()> {
    let flags = parse_flags(args)?;
    match command {
        "diff" => {
            let from = flags.from.ok_or_else(|| anyhow!("Missing --from argument"))?;
            let to = flags.to.ok_or_else(|| anyhow!("Missing --to argument"))?;
            cmd_diff(from, to, flags.stream, flags.json)
        }
        "rules" => {
            let snapshot = flags
                .snapshot
                .ok_or_else(|| anyhow!("Missing --snapshot argument"))?;
            let stream = flags.stream.ok_or_else(|| anyhow!("Missing --stream argument"))?;
            cmd_rules(snapshot, stream, flags.json)
        }
        "digest" => {
            let snapshot = flags
                .snapshot
                .ok_or_else(|| anyhow!("Missing --snapshot argument"))?;
            cmd_digest(snapshot, flags.json)
        }
        other => bail!("Unknown command: {}", other),
    }
}

fn print_usage() {
    println!("Snapshot CLI - Inspect stream hierarchy snapshots");
    println!();
    println!("USAGE:");
    println!("    snapshot-cli diff --from <file> --to <file> [--stream <path>] [--json]");
    println!("    snapshot-cli rules --snapshot <file> --stream <path> [--json]");
    println!("    snapshot-cli digest --snapshot <file> [--json]");
    println!();
    println!("COMMANDS:");
    println!("    diff      Show added, removed and modified rules");
    println!("    rules     Resolve local and inherited rules for a stream");
    println!("    digest    Print the content digest of a snapshot");
    println!();
    println!("EXAMPLES:");
    println!("    snapshot-cli diff --from r3.json --to r5.json --stream //main/dev");
    println!("    snapshot-cli rules --snapshot head.json --stream //main/dev");
}

fn main() {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        eprintln!("Error: missing command");
        println!();
        print_usage();
        process::exit(1);
    }

    if let Err(e) = run(&args[1], &args[2..]) {
        eprintln!("Error: {:#}", e);
        println!();
        print_usage();
        process::exit(1);
    }
}
