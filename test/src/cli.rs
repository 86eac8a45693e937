// Copyright 2022 Oxide Computer Company

use std::fs;

use crate::traffic::{self, quiet};
use wpc::{Command, Opts};
use wprefix::Prefix;

fn path(dir: &tempfile::TempDir, name: &str) -> String {
    dir.path().join(name).to_string_lossy().into_owned()
}

fn run(command: Command) -> Result<String, anyhow::Error> {
    colored::control::set_override(false);
    let mut out = Vec::new();
    wpc::run(&Opts { command }, &mut out, &quiet())?;
    Ok(String::from_utf8(out)?)
}

#[test]
fn compile_text() -> Result<(), anyhow::Error> {
    let dir = tempfile::tempdir()?;
    let weights = path(&dir, "weights");
    fs::write(&weights, "3 1\n")?;

    let out = run(Command::Compile {
        weights,
        target: None,
        base: "10.2.0.0/16".parse()?,
        json: false,
    })?;
    let lines: Vec<&str> = out.lines().collect();
    assert_eq!(lines.len(), 4);
    assert!(lines[0].contains("[3, 1] -> [3, 1]"));
    assert!(lines[1].contains("10.2.0.0/17"));
    assert!(lines[3].contains("10.2.192.0/18"));
    assert!(lines[3].trim_end().ends_with("-> 1"));
    Ok(())
}

#[test]
fn compile_json() -> Result<(), anyhow::Error> {
    let dir = tempfile::tempdir()?;
    let weights = path(&dir, "weights");
    fs::write(&weights, "\n  1 1 1\n")?;

    let out = run(Command::Compile {
        weights,
        target: Some(6),
        base: "192.168.0.0/24".parse()?,
        json: true,
    })?;
    let v: serde_json::Value = serde_json::from_str(&out)?;
    assert_eq!(v["width"], 3);
    assert_eq!(v["target"], 6);
    assert_eq!(v["normalized"], serde_json::json!([2, 2, 2]));
    assert_eq!(v["unassigned"]["start"], 6);
    assert_eq!(v["unassigned"]["end"], 8);

    let rules = v["rules"].as_array().expect("rules array");
    assert_eq!(rules.len(), 3);
    assert_eq!(rules[0]["prefix"], "00");
    assert_eq!(rules[2]["prefix"], "10");
    assert_eq!(rules[2]["backend"], 2);
    assert_eq!(rules[2]["network"]["addr"], "192.168.0.128");
    assert_eq!(rules[2]["network"]["len"], 26);
    Ok(())
}

#[test]
fn compile_rejects_bad_weights() -> Result<(), anyhow::Error> {
    let dir = tempfile::tempdir()?;
    let weights = path(&dir, "weights");

    fs::write(&weights, "1 -2 3\n")?;
    let cmd = |weights: &str| Command::Compile {
        weights: weights.to_string(),
        target: None,
        base: "10.2.0.0/16".parse().expect("base"),
        json: false,
    };
    assert!(run(cmd(&weights)).is_err());

    fs::write(&weights, "1 two 3\n")?;
    assert!(run(cmd(&weights)).is_err());

    fs::write(&weights, "\n\n")?;
    assert!(run(cmd(&weights)).is_err());

    assert!(run(cmd(&path(&dir, "missing"))).is_err());
    Ok(())
}

#[test]
fn analyze_writes_levels() -> Result<(), anyhow::Error> {
    let dir = tempfile::tempdir()?;
    let samples = path(&dir, "samples");
    let base: Prefix = "10.2.0.0/16".parse()?;

    let mut addrs = traffic::uniform(base, 2, 1)?;
    addrs.extend(traffic::uniform(base, 1, 2)?);
    let mut log = traffic::log_lines(&addrs);
    log.push_str("garbage line\n\n172.16.0.1 is not in the base\n");
    fs::write(&samples, log)?;

    let prefix = path(&dir, "out/level");
    run(Command::Analyze {
        samples,
        depth: 3,
        base,
        prefix: prefix.clone(),
    })?;

    // four samples spread evenly, four more at the start of each half
    assert_eq!(fs::read_to_string(format!("{}1", prefix))?, "4\n4");
    assert_eq!(fs::read_to_string(format!("{}2", prefix))?, "3\n3\n1\n1");
    let l3 = fs::read_to_string(format!("{}3", prefix))?;
    assert_eq!(l3.lines().count(), 8);
    assert_eq!(l3.lines().next(), Some("3"));
    Ok(())
}

#[test]
fn analyze_rejects_deep_tries() -> Result<(), anyhow::Error> {
    let dir = tempfile::tempdir()?;
    let samples = path(&dir, "samples");
    fs::write(&samples, "10.0.0.1\n")?;
    let res = run(Command::Analyze {
        samples,
        depth: 30,
        base: "0.0.0.0/0".parse()?,
        prefix: path(&dir, "level"),
    });
    assert!(res.is_err());
    Ok(())
}

#[test]
fn audit_json() -> Result<(), anyhow::Error> {
    let dir = tempfile::tempdir()?;
    let base: Prefix = "10.2.0.0/16".parse()?;
    let weights = path(&dir, "weights");
    let samples = path(&dir, "samples");
    fs::write(&weights, "3 1\n")?;
    fs::write(&samples, traffic::log_lines(&traffic::uniform(base, 2, 5)?))?;

    let out = run(Command::Audit {
        weights,
        samples,
        target: None,
        base,
        json: true,
    })?;
    let v: serde_json::Value = serde_json::from_str(&out)?;
    assert_eq!(v["samples"], 20);
    assert_eq!(v["unassigned"], 0);
    assert_eq!(v["rows"][0]["observed"], 15);
    assert_eq!(v["rows"][1]["observed"], 5);
    assert_eq!(v["rows"][1]["expected"], 5.0);
    Ok(())
}

#[test]
fn audit_text() -> Result<(), anyhow::Error> {
    let dir = tempfile::tempdir()?;
    let base: Prefix = "fd00:4700::/24".parse()?;
    let weights = path(&dir, "weights");
    let samples = path(&dir, "samples");
    fs::write(&weights, "1 1\n")?;
    // every sample in the lower half
    let addrs = vec![traffic::address(base, 1, 0)?; 10];
    fs::write(&samples, traffic::log_lines(&addrs))?;

    let out = run(Command::Audit {
        weights,
        samples,
        target: None,
        base,
        json: false,
    })?;
    let lines: Vec<&str> = out.lines().collect();
    assert_eq!(lines[0], "10 samples, 0 unassigned");
    assert!(lines[2].trim_end().ends_with("+5.0"));
    assert!(lines[3].trim_end().ends_with("-5.0"));
    Ok(())
}
