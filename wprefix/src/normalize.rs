// Copyright 2022 Oxide Computer Company

//! Rescaling backend weights so they fill an address space exactly.
//!
//! Shares are computed with exact integer arithmetic. Each weight `w` with
//! total `s` is scaled to `w * t / s` for target `t` and rounded to the
//! nearest integer, ties rounding up. If the rounded shares do not sum to
//! `t`, units are handed out (or taken back) one bucket at a time following
//! the rounding residuals: the buckets that were rounded down the furthest
//! gain first, the buckets rounded up the furthest lose first.

use std::collections::HashSet;
use std::fmt::Debug;
use std::hash::Hash;

use serde::{Deserialize, Serialize};

use crate::bits::MAX_WIDTH;
use crate::error::Error;

/// The largest total an address space may be normalized to.
pub const MAX_TARGET: u64 = 1 << MAX_WIDTH;

/// Backend weights as supplied by a caller. Backend ids are opaque and must
/// be unique; their order only matters for breaking ties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeightVector<B> {
    entries: Vec<(B, u64)>,
}

/// Weights whose sum is exactly `target`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedWeightVector<B> {
    entries: Vec<(B, u64)>,
    target: u64,
}

impl<B: Clone + Eq + Hash + Debug> WeightVector<B> {
    pub fn new<I>(entries: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = (B, i64)>,
    {
        let mut seen = HashSet::new();
        let mut result = Vec::new();
        for (id, weight) in entries {
            if weight < 0 {
                return Err(Error::invalid(
                    "weight vector",
                    format!("backend {:?} has negative weight {}", id, weight),
                ));
            }
            if !seen.insert(id.clone()) {
                return Err(Error::invalid(
                    "weight vector",
                    format!("duplicate backend {:?}", id),
                ));
            }
            result.push((id, weight as u64));
        }
        if result.is_empty() {
            return Err(Error::invalid("weight vector", "no backends"));
        }
        Ok(Self { entries: result })
    }

    pub fn entries(&self) -> &[(B, u64)] {
        &self.entries
    }

    pub fn weights(&self) -> Vec<u64> {
        self.entries.iter().map(|(_, w)| *w).collect()
    }

    pub fn total(&self) -> Result<u64, Error> {
        checked_total(&self.weights())
    }

    /// Rescale to `target`, or to the smallest power of two that is at least
    /// the current total when no target is given.
    pub fn normalize(
        &self,
        target: Option<i64>,
    ) -> Result<NormalizedWeightVector<B>, Error> {
        let target = match target {
            Some(t) if t < 0 => {
                return Err(Error::invalid(
                    "normalize",
                    format!("negative target {}", t),
                ))
            }
            Some(t) => t as u64,
            None => default_target(self.total()?)?,
        };
        let values = normalize(&self.weights(), target)?;
        Ok(NormalizedWeightVector {
            entries: self
                .entries
                .iter()
                .zip(values)
                .map(|((id, _), v)| (id.clone(), v))
                .collect(),
            target,
        })
    }
}

impl WeightVector<usize> {
    /// Weights identified by their position.
    pub fn from_weights(weights: &[i64]) -> Result<Self, Error> {
        Self::new(weights.iter().copied().enumerate())
    }
}

impl<B> NormalizedWeightVector<B> {
    pub fn entries(&self) -> &[(B, u64)] {
        &self.entries
    }

    pub fn weights(&self) -> Vec<u64> {
        self.entries.iter().map(|(_, w)| *w).collect()
    }

    pub fn target(&self) -> u64 {
        self.target
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<B: PartialEq> NormalizedWeightVector<B> {
    pub fn weight_of(&self, id: &B) -> Option<u64> {
        self.entries.iter().find(|(b, _)| b == id).map(|(_, w)| *w)
    }
}

/// Smallest power of two that is at least `total`. An empty total maps to a
/// single address.
pub fn default_target(total: u64) -> Result<u64, Error> {
    match total.checked_next_power_of_two() {
        Some(t) if t <= MAX_TARGET => Ok(t),
        _ => Err(Error::invalid(
            "normalize",
            format!("total weight {} exceeds 2^{}", total, MAX_WIDTH),
        )),
    }
}

fn checked_total(weights: &[u64]) -> Result<u64, Error> {
    weights.iter().try_fold(0u64, |acc, w| {
        acc.checked_add(*w).ok_or_else(|| {
            Error::invalid("normalize", "total weight overflows u64")
        })
    })
}

/// Rescale `weights` so they sum to exactly `target`.
pub fn normalize(weights: &[u64], target: u64) -> Result<Vec<u64>, Error> {
    if weights.is_empty() {
        return Err(Error::invalid("normalize", "no weights"));
    }
    if target > MAX_TARGET {
        return Err(Error::invalid(
            "normalize",
            format!("target {} exceeds 2^{}", target, MAX_WIDTH),
        ));
    }

    let total = checked_total(weights)?;
    if total == target {
        return Ok(weights.to_vec());
    }

    // Nothing to be proportional to, every bucket gets an equal share.
    let ones;
    let (weights, total) = if total == 0 {
        ones = vec![1u64; weights.len()];
        (ones.as_slice(), weights.len() as u64)
    } else {
        (weights, total)
    };

    let s = total as u128;
    let t = target as u128;

    // r = round(w * t / s), residual numerator d = w * t - r * s
    let mut rounded = Vec::with_capacity(weights.len());
    let mut residuals = Vec::with_capacity(weights.len());
    for w in weights {
        let exact = *w as u128 * t;
        let r = (2 * exact + s) / (2 * s);
        residuals.push(exact as i128 - (r * s) as i128);
        rounded.push(r as u64);
    }

    let sum: u128 = rounded.iter().map(|r| *r as u128).sum();
    if sum == t {
        return Ok(rounded);
    }

    let mut order: Vec<usize> = (0..rounded.len()).collect();
    if sum < t {
        order.sort_by(|a, b| residuals[*b].cmp(&residuals[*a]).then(a.cmp(b)));
        let mut missing = t - sum;
        for i in order.iter().cycle() {
            if missing == 0 {
                break;
            }
            rounded[*i] += 1;
            missing -= 1;
        }
    } else {
        order.sort_by(|a, b| residuals[*a].cmp(&residuals[*b]).then(a.cmp(b)));
        let mut excess = sum - t;
        for i in order.iter().cycle() {
            if excess == 0 {
                break;
            }
            if rounded[*i] == 0 {
                continue;
            }
            rounded[*i] -= 1;
            excess -= 1;
        }
    }

    Ok(rounded)
}
