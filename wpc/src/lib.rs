// Copyright 2022 Oxide Computer Company

use std::fs;
use std::io::Write;
use std::net::IpAddr;
use std::ops::Range;
use std::path::Path;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use regex::Regex;
use serde::Serialize;
use slog::{debug, info, o, warn, Drain, Logger};
use wprefix::{
    render, trie::MAX_DEPTH, AddressTrie, Audit, NetworkRule,
    PartitionCompiler, Prefix, Settings, WeightVector,
};

#[derive(Parser)]
#[command(version = "0.1", about = "Weighted prefix compiler")]
pub struct Opts {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Compile backend weights into prefix rules.
    Compile {
        /// File whose first line holds one integer weight per backend.
        weights: String,

        /// Total to normalize weights to, defaults to the next power of 2.
        #[arg(long, allow_negative_numbers = true)]
        target: Option<i64>,

        /// Network the rule space is carved out of.
        #[arg(long, default_value = "10.2.0.0/16")]
        base: Prefix,

        /// Emit JSON instead of text.
        #[arg(long)]
        json: bool,
    },

    /// Count address samples per level of a binary trie.
    Analyze {
        /// File with one observed address per line.
        samples: String,

        /// Number of address bits to count over.
        #[arg(short, long, default_value_t = 8)]
        depth: usize,

        /// Only the bits after this network are counted.
        #[arg(long, default_value = "0.0.0.0/0")]
        base: Prefix,

        /// Per-level output files are named <prefix><level>.
        #[arg(short, long, default_value = "level")]
        prefix: String,
    },

    /// Compare address samples against the split compiled from weights.
    Audit {
        /// File whose first line holds one integer weight per backend.
        weights: String,

        /// File with one observed address per line.
        samples: String,

        /// Total to normalize weights to, defaults to the next power of 2.
        #[arg(long, allow_negative_numbers = true)]
        target: Option<i64>,

        /// Network the rule space is carved out of.
        #[arg(long, default_value = "10.2.0.0/16")]
        base: Prefix,

        /// Emit JSON instead of text.
        #[arg(long)]
        json: bool,
    },
}

/// Terminal logger filtered by `RUST_LOG`.
pub fn logger() -> Logger {
    let decorator = slog_term::TermDecorator::new().stderr().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_envlogger::new(drain).fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    Logger::root(drain, o!())
}

pub fn run(opts: &Opts, out: &mut impl Write, log: &Logger) -> Result<()> {
    match &opts.command {
        Command::Compile {
            weights,
            target,
            base,
            json,
        } => compile(weights, *target, *base, *json, out, log),
        Command::Analyze {
            samples,
            depth,
            base,
            prefix,
        } => analyze(samples, *depth, *base, prefix, log),
        Command::Audit {
            weights,
            samples,
            target,
            base,
            json,
        } => audit(weights, samples, *target, *base, *json, out, log),
    }
}

/// Weights are whitespace separated integers on the first non-empty line.
/// A backend is identified by the position of its weight.
pub fn read_weights(filename: &str) -> Result<Vec<i64>> {
    let contents = fs::read_to_string(filename)
        .map_err(|e| anyhow!("read weights: {}: {}", filename, e))?;
    let line = contents
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .ok_or_else(|| anyhow!("read weights: {}: no weights", filename))?;
    line.split_whitespace()
        .map(|tok| {
            tok.parse::<i64>().map_err(|e| {
                anyhow!("read weights: {}: '{}': {}", filename, tok, e)
            })
        })
        .collect()
}

/// Pull one address out of every line that has one. The first dotted quad
/// in the line that is a valid address wins; otherwise the first token that
/// parses as an address is taken.
pub fn read_samples(filename: &str, log: &Logger) -> Result<Vec<IpAddr>> {
    let contents = fs::read_to_string(filename)
        .map_err(|e| anyhow!("read samples: {}: {}", filename, e))?;
    let v4 = Regex::new(r"\b\d{1,3}(?:\.\d{1,3}){3}\b")?;

    let mut result = Vec::new();
    for (n, line) in contents.lines().enumerate() {
        let found = v4
            .find_iter(line)
            .find_map(|m| m.as_str().parse::<IpAddr>().ok())
            .or_else(|| {
                line.split_whitespace().find_map(|t| {
                    t.parse::<IpAddr>().ok().or_else(|| {
                        t.trim_matches(|c| c == ':' || c == ',')
                            .parse::<IpAddr>()
                            .ok()
                    })
                })
            });
        match found {
            Some(addr) => result.push(addr),
            None if line.trim().is_empty() => {}
            None => warn!(log, "no address"; "line" => n + 1),
        }
    }
    debug!(log, "read samples"; "file" => filename, "count" => result.len());
    Ok(result)
}

#[derive(Serialize)]
struct CompileReport {
    width: usize,
    target: u64,
    normalized: Vec<u64>,
    unassigned: Option<Range<u64>>,
    rules: Vec<NetworkRule<usize>>,
}

pub fn compile(
    weights: &str,
    target: Option<i64>,
    base: Prefix,
    json: bool,
    out: &mut impl Write,
    log: &Logger,
) -> Result<()> {
    let raw = read_weights(weights)?;
    let wv = WeightVector::from_weights(&raw)?;
    let c = PartitionCompiler::new(log.new(o!("stage" => "compile")))
        .run(&wv, target)?;
    let rules = render(&c, &Settings { base })?;
    info!(log, "compiled"; "backends" => raw.len(), "rules" => rules.len());

    if json {
        let report = CompileReport {
            width: c.width,
            target: c.normalized.target(),
            normalized: c.normalized.weights(),
            unassigned: c.unassigned(),
            rules,
        };
        writeln!(out, "{}", serde_json::to_string_pretty(&report)?)?;
        return Ok(());
    }

    writeln!(
        out,
        "{} {:?} -> {:?} (target {}, {} bits)",
        "normalized".bright_white(),
        raw,
        c.normalized.weights(),
        c.normalized.target(),
        c.width,
    )?;
    for r in &rules {
        let bits = if r.prefix.is_empty() {
            "*".to_string()
        } else {
            r.prefix.to_string()
        };
        writeln!(
            out,
            "{:>w$} {:<20} -> {}",
            bits.cyan(),
            r.network.to_string(),
            r.backend.to_string().bright_green(),
            w = c.width.max(1),
        )?;
    }
    if let Some(range) = c.unassigned() {
        writeln!(
            out,
            "{} offsets {}..{} have no backend",
            "warning:".yellow(),
            range.start,
            range.end,
        )?;
    }
    Ok(())
}

/// Per-level sample counts, written as `<prefix><level>` files with one value
/// per line, heaviest first.
pub fn analyze(
    samples: &str,
    depth: usize,
    base: Prefix,
    prefix: &str,
    log: &Logger,
) -> Result<()> {
    let addrs = read_samples(samples, log)?;
    let trie = ingest(&addrs, depth, base, log)?;

    for level in 1..=depth {
        let values: Vec<String> = trie
            .level_values(level)
            .iter()
            .map(|v| v.to_string())
            .collect();
        let path = format!("{}{}", prefix, level);
        ensure_parent(&path)?;
        fs::write(&path, values.join("\n"))
            .map_err(|e| anyhow!("write {}: {}", path, e))?;
        debug!(log, "wrote level"; "path" => &path, "nodes" => values.len());
    }
    info!(log, "analyzed";
        "samples" => trie.value(trie.root()),
        "depth" => depth
    );
    Ok(())
}

/// Count `addrs` into a trie keyed on the `depth` bits after `base`.
/// Addresses outside `base` are skipped.
pub fn ingest(
    addrs: &[IpAddr],
    depth: usize,
    base: Prefix,
    log: &Logger,
) -> Result<AddressTrie> {
    if depth > MAX_DEPTH {
        return Err(anyhow!("depth {} exceeds {}", depth, MAX_DEPTH));
    }
    let mut trie = AddressTrie::new(depth)?;
    let mut skipped = 0usize;
    for addr in addrs {
        if !base.contains(*addr) {
            skipped += 1;
            continue;
        }
        trie.insert(&base.key_bits(*addr, depth)?)?;
    }
    if skipped > 0 {
        warn!(log, "samples outside base network";
            "base" => %base,
            "skipped" => skipped
        );
    }
    Ok(trie)
}

#[allow(clippy::too_many_arguments)]
pub fn audit(
    weights: &str,
    samples: &str,
    target: Option<i64>,
    base: Prefix,
    json: bool,
    out: &mut impl Write,
    log: &Logger,
) -> Result<()> {
    let raw = read_weights(weights)?;
    let wv = WeightVector::from_weights(&raw)?;
    let c = PartitionCompiler::new(log.new(o!("stage" => "compile")))
        .run(&wv, target)?;
    render(&c, &Settings { base })?;

    let addrs = read_samples(samples, log)?;
    let trie = ingest(&addrs, c.width, base, log)?;
    let report: Audit<usize> = wprefix::audit(&c, &trie)?;

    if json {
        writeln!(out, "{}", serde_json::to_string_pretty(&report)?)?;
        return Ok(());
    }

    writeln!(
        out,
        "{} samples, {} unassigned",
        report.samples.to_string().bright_white(),
        report.unassigned,
    )?;
    writeln!(
        out,
        "{:>8} {:>8} {:>10} {:>10} {:>10}",
        "backend", "weight", "expected", "observed", "deviation"
    )?;
    for row in &report.rows {
        let dev = format!("{:+.1}", row.deviation());
        let dev = if row.deviation().abs() > row.expected * 0.1 {
            dev.bright_red()
        } else {
            dev.normal()
        };
        writeln!(
            out,
            "{:>8} {:>8} {:>10.1} {:>10} {:>10}",
            row.backend, row.weight, row.expected, row.observed, dev,
        )?;
    }
    Ok(())
}

/// Create `path`'s parent directory if it has one that does not exist.
pub fn ensure_parent(path: &str) -> Result<()> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)
                .map_err(|e| anyhow!("create {}: {}", parent.display(), e))?;
        }
    }
    Ok(())
}
