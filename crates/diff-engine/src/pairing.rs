//! One-to-one pairing of base and compare records.

use std::collections::{HashMap, VecDeque};

/// What the pairing needs to know about a record.
pub(crate) struct Keyed<'a> {
    pub row_key: &'a str,
    pub keys: Vec<Option<String>>,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct Pairing {
    pub unchanged: Vec<(usize, usize)>,
    pub modified: Vec<(usize, usize)>,
    pub added: Vec<usize>,
    pub removed: Vec<usize>,
}

/// Pairs identical content first, then identity keys rank by rank. Every
/// index lands in exactly one bucket.
pub(crate) fn pair(base: &[Keyed<'_>], compare: &[Keyed<'_>]) -> Pairing {
    let mut base_taken = vec![false; base.len()];
    let mut cmp_taken = vec![false; compare.len()];
    let mut out = Pairing::default();

    let mut by_row_key: HashMap<&str, VecDeque<usize>> = HashMap::new();
    for (i, c) in compare.iter().enumerate() {
        by_row_key.entry(c.row_key).or_default().push_back(i);
    }
    for (i, b) in base.iter().enumerate() {
        if let Some(j) = by_row_key.get_mut(b.row_key).and_then(VecDeque::pop_front) {
            base_taken[i] = true;
            cmp_taken[j] = true;
            out.unchanged.push((i, j));
        }
    }

    let ranks = base.iter().chain(compare).map(|k| k.keys.len()).max().unwrap_or(0);
    for rank in 0..ranks {
        let mut by_key: HashMap<&str, VecDeque<usize>> = HashMap::new();
        for (j, c) in compare.iter().enumerate() {
            if cmp_taken[j] {
                continue;
            }
            if let Some(Some(key)) = c.keys.get(rank) {
                by_key.entry(key.as_str()).or_default().push_back(j);
            }
        }
        for (i, b) in base.iter().enumerate() {
            if base_taken[i] {
                continue;
            }
            let Some(Some(key)) = b.keys.get(rank) else { continue };
            if let Some(j) = by_key.get_mut(key.as_str()).and_then(VecDeque::pop_front) {
                base_taken[i] = true;
                cmp_taken[j] = true;
                if b.row_key == compare[j].row_key {
                    out.unchanged.push((i, j));
                } else {
                    out.modified.push((i, j));
                }
            }
        }
    }

    out.removed = (0..base.len()).filter(|&i| !base_taken[i]).collect();
    out.added = (0..compare.len()).filter(|&j| !cmp_taken[j]).collect();
    out
}
