// Copyright 2022 Oxide Computer Company

//! Synthetic address samples for exercising compiled splits.

use std::net::IpAddr;

use rand::Rng;
use slog::{o, Discard, Logger};
use wprefix::{BitPath, Error, Prefix};

/// A logger that drops everything, for tests that do not care about output.
pub fn quiet() -> Logger {
    Logger::root(Discard, o!())
}

/// The first address of the block selected by the `width` bit `offset` under
/// `base`.
pub fn address(base: Prefix, width: usize, offset: u64) -> Result<IpAddr, Error> {
    Ok(base.project(&BitPath::from_value(offset, width))?.addr)
}

/// `per_offset` samples for every offset of a `width` bit space under `base`.
pub fn uniform(
    base: Prefix,
    width: usize,
    per_offset: usize,
) -> Result<Vec<IpAddr>, Error> {
    let mut result = Vec::with_capacity((1usize << width) * per_offset);
    for offset in 0..1u64 << width {
        let a = address(base, width, offset)?;
        result.extend(std::iter::repeat(a).take(per_offset));
    }
    Ok(result)
}

/// `count` samples drawn at random offsets of a `width` bit space.
pub fn scattered<R: Rng>(
    base: Prefix,
    width: usize,
    count: usize,
    rng: &mut R,
) -> Result<Vec<IpAddr>, Error> {
    (0..count)
        .map(|_| address(base, width, rng.random_range(0..1u64 << width)))
        .collect()
}

/// Render samples the way a flow log would, one address per line.
pub fn log_lines(addrs: &[IpAddr]) -> String {
    addrs
        .iter()
        .enumerate()
        .map(|(i, a)| format!("flow {} src {} bytes {}\n", i, a, 64 + i % 1400))
        .collect()
}
