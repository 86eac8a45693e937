// Copyright 2022 Oxide Computer Company

use crate::traffic::{self, quiet};
use rand::rngs::StdRng;
use rand::SeedableRng;
use wprefix::{
    audit, AddressTrie, BitPath, PartitionCompiler, Prefix, WeightVector,
};

#[test]
fn repeated_insert_counts_along_the_path() -> Result<(), anyhow::Error> {
    let mut t = AddressTrie::new(4)?;
    let key: BitPath = "1011".parse()?;
    for _ in 0..5 {
        t.insert(&key)?;
    }
    for len in 0..=4 {
        let id = t.node_at(&key.truncated(len)).expect("node on path");
        assert_eq!(t.value(id), 5);
    }
    let off = t.node_at(&"0".parse()?).expect("left child");
    assert_eq!(t.value(off), 0);
    assert_eq!(t.level_values(1), vec![5, 0]);
    Ok(())
}

#[test]
fn built_trie_aggregates_leaves() -> Result<(), anyhow::Error> {
    let t = AddressTrie::build(2, Some(&[2, 2, 1, 2][..]))?;
    assert_eq!(t.value(t.root()), 7);
    assert_eq!(t.level_values(1), vec![4, 3]);

    let order: Vec<String> = t
        .ranked(t.leaves())
        .into_iter()
        .map(|id| id.name().to_string())
        .collect();
    assert_eq!(order, ["00", "01", "11", "10"]);

    assert!(AddressTrie::build(2, Some(&[1, 2, 3][..])).is_err());
    Ok(())
}

#[test]
fn random_tries_stay_consistent() -> Result<(), anyhow::Error> {
    let mut rng = StdRng::seed_from_u64(0xace);
    for depth in 0..=6 {
        let t = AddressTrie::random(depth, 50, Some(1000), &mut rng)?;
        assert_eq!(t.len(), (1 << (depth + 1)) - 1);
        assert_eq!(t.value(t.root()), 1000);
        for level in 0..=depth {
            let values = t.level_values(level);
            assert_eq!(values.len(), 1 << level);
            assert_eq!(values.iter().sum::<u64>(), 1000);
            assert!(values.windows(2).all(|w| w[0] >= w[1]));
        }
        assert!(t.level_values(depth + 1).is_empty());
    }
    Ok(())
}

#[test]
fn heaviest_blocks_are_taken_in_turn() -> Result<(), anyhow::Error> {
    let mut t = AddressTrie::build(2, Some(&[5, 1, 1, 1][..]))?;
    // once "00" is gone the right half is heavier
    let mut taken = Vec::new();
    while let Some((id, v)) = t.take_heaviest(2) {
        taken.push((id.name().to_string(), v));
    }
    assert_eq!(
        taken,
        vec![
            ("00".to_string(), 5),
            ("10".to_string(), 1),
            ("01".to_string(), 1),
            ("11".to_string(), 1),
        ]
    );
    assert_eq!(t.value(t.root()), 0);

    t.restore();
    assert_eq!(t.value(t.root()), 8);
    assert_eq!(t.take_heaviest(1).map(|(_, v)| v), Some(6));
    Ok(())
}

#[test]
fn even_traffic_matches_the_split() -> Result<(), anyhow::Error> {
    let base: Prefix = "10.2.0.0/16".parse()?;
    let w = WeightVector::from_weights(&[1, 2, 3, 4])?;
    let c = PartitionCompiler::new(quiet()).run(&w, Some(16))?;

    let mut t = AddressTrie::new(c.width)?;
    for a in traffic::uniform(base, c.width, 3)? {
        t.insert(&base.key_bits(a, c.width)?)?;
    }

    let report = audit(&c, &t)?;
    assert_eq!(report.samples, 48);
    assert_eq!(report.unassigned, 0);
    for row in &report.rows {
        assert_eq!(row.observed, 3 * row.weight);
        assert_eq!(row.deviation(), 0.0);
    }
    Ok(())
}

#[test]
fn scattered_traffic_lands_somewhere() -> Result<(), anyhow::Error> {
    let base: Prefix = "fd00:4700::/24".parse()?;
    let w = WeightVector::from_weights(&[7, 2, 9])?;
    let c = PartitionCompiler::new(quiet()).run(&w, Some(24))?;

    let mut rng = StdRng::seed_from_u64(99);
    let mut t = AddressTrie::new(c.width)?;
    for a in traffic::scattered(base, c.width, 2000, &mut rng)? {
        t.insert(&base.key_bits(a, c.width)?)?;
    }

    let report = audit(&c, &t)?;
    let observed: u64 = report.rows.iter().map(|r| r.observed).sum();
    assert_eq!(report.samples, 2000);
    assert_eq!(observed + report.unassigned, 2000);

    // offsets 24..32 have no backend
    let tail: u64 = (24..32u64)
        .map(|o| t.value(t.node_at(&BitPath::from_value(o, c.width)).unwrap()))
        .sum();
    assert_eq!(report.unassigned, tail);
    Ok(())
}
