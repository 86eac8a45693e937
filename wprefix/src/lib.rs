// Copyright 2022 Oxide Computer Company

//! Weighted address space partitioning.
//!
//! Backend weights are normalized to fill a power of two sized address space,
//! split into power of two sized blocks and compiled into a set of prefix
//! rules that cover the space exactly. An [`AddressTrie`] over the same
//! address bits counts observed samples so the realized split can be checked
//! against the intended one.

pub mod audit;
pub mod bits;
pub mod error;
pub mod normalize;
pub mod partition;
pub mod prefix;
pub mod trie;

pub use audit::{audit, Audit, AuditRow};
pub use bits::BitPath;
pub use error::{AlignmentError, Error, InvalidInput};
pub use normalize::{normalize, NormalizedWeightVector, WeightVector};
pub use partition::{Block, Compilation, PartitionCompiler, PrefixRule};
pub use prefix::{render, NetworkRule, Prefix, Settings};
pub use trie::{AddressTrie, Node, NodeId, NodeQueue};

#[cfg(test)]
pub(crate) fn test_logger() -> slog::Logger {
    use slog::Drain;
    use std::env;

    match env::var("RUST_LOG") {
        Ok(_) => {}
        Err(_) => env::set_var("RUST_LOG", "info"),
    };

    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_envlogger::new(drain).fuse();
    slog::Logger::root(std::sync::Mutex::new(drain).fuse(), slog::o!())
}
