// Copyright 2022 Oxide Computer Company

use anyhow::Result;
use clap::Parser;

fn main() {
    if let Err(e) = run() {
        println!("{}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let opts = wpc::Opts::parse();
    let log = wpc::logger();
    let stdout = std::io::stdout();
    wpc::run(&opts, &mut stdout.lock(), &log)
}
