// Copyright 2022 Oxide Computer Company

//! Compiling normalized weights into prefix rules.
//!
//! Every backend weight is split into its binary digits, one power of two
//! sized block per set bit. All blocks are then laid out over the address
//! space largest first. Because every block placed so far is at least as
//! large as the next one and all sizes are powers of two, the running offset
//! is always a multiple of the next block's size. Each block therefore covers
//! exactly the addresses selected by the top bits of its offset, which is the
//! prefix emitted for it.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::fmt::Debug;
use std::hash::Hash;
use std::ops::Range;

use serde::{Deserialize, Serialize};
use slog::{debug, trace, Logger};

use crate::bits::{BitPath, MAX_WIDTH};
use crate::error::{AlignmentError, Error};
use crate::normalize::{NormalizedWeightVector, WeightVector};

/// A power of two sized allocation unit owned by one backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block<B> {
    pub size: u64,
    pub backend: B,

    /// log2(size)
    pub bits: u32,
}

impl<B> Block<B> {
    pub fn new(size: u64, backend: B) -> Result<Self, Error> {
        if !size.is_power_of_two() {
            return Err(Error::invalid(
                "block",
                format!("size {} is not a power of 2", size),
            ));
        }
        Ok(Self {
            size,
            backend,
            bits: size.trailing_zeros(),
        })
    }
}

/// All addresses whose top bits equal `prefix` go to `backend`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PrefixRule<B> {
    pub prefix: BitPath,
    pub backend: B,
}

impl<B> PrefixRule<B> {
    /// Offsets covered by this rule in a `width` bit address space.
    pub fn range(&self, width: usize) -> Range<u64> {
        self.prefix.range(width)
    }
}

/// Everything produced by one pass from weights to rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Compilation<B> {
    /// Number of address bits the rule prefixes are drawn from.
    pub width: usize,
    pub normalized: NormalizedWeightVector<B>,
    pub blocks: Vec<Block<B>>,
    pub rules: Vec<PrefixRule<B>>,
}

impl<B: PartialEq> Compilation<B> {
    /// Addresses left without a rule. Only non-empty when the target total is
    /// not a power of two.
    pub fn unassigned(&self) -> Option<Range<u64>> {
        let total = self.normalized.target();
        let end = 1u64 << self.width;
        if total < end {
            Some(total..end)
        } else {
            None
        }
    }

    /// The backend whose rule covers `offset`.
    pub fn lookup(&self, offset: u64) -> Option<&B> {
        self.rules
            .iter()
            .find(|r| r.range(self.width).contains(&offset))
            .map(|r| &r.backend)
    }

    /// Total number of addresses the rules hand to `backend`.
    pub fn allocated(&self, backend: &B) -> u64 {
        self.rules
            .iter()
            .filter(|r| &r.backend == backend)
            .map(|r| {
                let range = r.range(self.width);
                range.end - range.start
            })
            .sum()
    }
}

/// Number of prefix bits needed to address `total` units, ceil(log2(total)).
pub fn width(total: u64) -> usize {
    if total <= 1 {
        0
    } else {
        (u64::BITS - (total - 1).leading_zeros()) as usize
    }
}

/// A backend waiting in the decomposition queue. Larger remaining weight
/// pops first, then the backend that comes first in the weight vector.
#[derive(Debug, PartialEq, Eq)]
struct Pending {
    remaining: u64,
    index: usize,
}

impl Ord for Pending {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.remaining, Reverse(self.index))
            .cmp(&(other.remaining, Reverse(other.index)))
    }
}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

pub struct PartitionCompiler {
    log: Logger,
}

impl PartitionCompiler {
    pub fn new(log: Logger) -> Self {
        Self { log }
    }

    /// Normalize `weights` to `target` (or the next power of two), then
    /// decompose and compile.
    pub fn run<B: Clone + Eq + Hash + Debug>(
        &self,
        weights: &WeightVector<B>,
        target: Option<i64>,
    ) -> Result<Compilation<B>, Error> {
        let normalized = weights.normalize(target)?;
        debug!(self.log, "normalized";
            "target" => normalized.target(),
            "weights" => ?normalized.weights()
        );
        let blocks = self.decompose(&normalized);
        let rules = self.compile(normalized.target(), &blocks)?;
        Ok(Compilation {
            width: width(normalized.target()),
            normalized,
            blocks,
            rules,
        })
    }

    /// Split every weight into one block per set bit. Blocks come out in
    /// non-increasing size order across all backends.
    pub fn decompose<B: Clone + Debug>(
        &self,
        normalized: &NormalizedWeightVector<B>,
    ) -> Vec<Block<B>> {
        let entries = normalized.entries();
        let mut queue: BinaryHeap<Pending> = entries
            .iter()
            .enumerate()
            .filter(|(_, (_, w))| *w > 0)
            .map(|(index, (_, w))| Pending {
                remaining: *w,
                index,
            })
            .collect();

        let mut blocks = Vec::new();
        while let Some(mut p) = queue.pop() {
            let size = 1u64 << (u64::BITS - 1 - p.remaining.leading_zeros());
            let backend = entries[p.index].0.clone();
            trace!(self.log, "block";
                "size" => size,
                "backend" => ?backend,
                "remaining" => p.remaining - size
            );
            blocks.push(Block {
                size,
                backend,
                bits: size.trailing_zeros(),
            });
            p.remaining -= size;
            if p.remaining > 0 {
                queue.push(p);
            }
        }

        blocks
    }

    /// Lay `blocks` out from offset zero and emit the prefix of each one. The
    /// blocks must be in non-increasing size order and sum to `total`.
    pub fn compile<B: Clone + Debug>(
        &self,
        total: u64,
        blocks: &[Block<B>],
    ) -> Result<Vec<PrefixRule<B>>, Error> {
        if total == 0 {
            return Err(Error::invalid("compile", "total weight is zero"));
        }
        let power = width(total);
        if power > MAX_WIDTH {
            return Err(Error::invalid(
                "compile",
                format!("total weight {} exceeds 2^{}", total, MAX_WIDTH),
            ));
        }
        trace!(self.log, "computed power"; "power" => power);

        let mut sum = 0u64;
        for b in blocks {
            if !b.size.is_power_of_two() || b.size.trailing_zeros() != b.bits {
                return Err(Error::invalid(
                    "compile",
                    format!("malformed block {:?}", b),
                ));
            }
            sum = sum.saturating_add(b.size);
        }
        if sum != total {
            return Err(Error::invalid(
                "compile",
                format!("blocks sum to {} but total is {}", sum, total),
            ));
        }

        let mut offset = 0u64;
        let mut rules = Vec::with_capacity(blocks.len());
        for b in blocks {
            if offset % b.size != 0 {
                return Err(AlignmentError {
                    offset,
                    size: b.size,
                    backend: format!("{:?}", b.backend),
                }
                .into());
            }
            let prefix =
                BitPath::prefix_of(offset, power, power - b.bits as usize);
            trace!(self.log, "rule";
                "prefix" => %prefix,
                "backend" => ?b.backend,
                "offset" => offset
            );
            rules.push(PrefixRule {
                prefix,
                backend: b.backend.clone(),
            });
            offset += b.size;
        }

        debug!(self.log, "compiled";
            "rules" => rules.len(),
            "power" => power
        );
        Ok(rules)
    }
}
