// Copyright 2022 Oxide Computer Company

//! Checking observed traffic against a compiled split.

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::partition::Compilation;
use crate::trie::AddressTrie;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRow<B> {
    pub backend: B,

    /// Normalized weight, the number of addresses the backend owns.
    pub weight: u64,

    /// Samples the backend should have seen if traffic were spread evenly
    /// over the address space.
    pub expected: f64,

    /// Samples that landed under the backend's rules.
    pub observed: u64,
}

impl<B> AuditRow<B> {
    pub fn deviation(&self) -> f64 {
        self.observed as f64 - self.expected
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Audit<B> {
    /// Samples counted at the trie root.
    pub samples: u64,

    /// Samples not covered by any rule.
    pub unassigned: u64,

    pub rows: Vec<AuditRow<B>>,
}

/// Sum the samples in `trie` under each rule of `compilation`. The trie must
/// be keyed on the same bits the rules were compiled over and be at least as
/// deep as the longest rule prefix.
pub fn audit<B: Clone + PartialEq>(
    compilation: &Compilation<B>,
    trie: &AddressTrie,
) -> Result<Audit<B>, Error> {
    let samples = trie.value(trie.root());
    let space = (1u64 << compilation.width) as f64;

    let mut rows: Vec<AuditRow<B>> = compilation
        .normalized
        .entries()
        .iter()
        .map(|(b, w)| AuditRow {
            backend: b.clone(),
            weight: *w,
            expected: samples as f64 * *w as f64 / space,
            observed: 0,
        })
        .collect();

    let mut covered = 0u64;
    for r in &compilation.rules {
        let id = trie.node_at(&r.prefix).ok_or_else(|| {
            Error::invalid(
                "audit",
                format!(
                    "rule prefix {} is deeper than the trie ({})",
                    r.prefix,
                    trie.depth()
                ),
            )
        })?;
        let count = trie.value(id);
        covered += count;
        if let Some(row) = rows.iter_mut().find(|x| x.backend == r.backend) {
            row.observed += count;
        }
    }

    Ok(Audit {
        samples,
        unassigned: samples.saturating_sub(covered),
        rows,
    })
}
