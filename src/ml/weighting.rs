use std::collections::BTreeMap;

/// Balanced class weights `n / (K * n_c)` over the classes present in `y`.
///
/// With these weights every class carries the same total mass and the
/// weighted sample count equals `n`.
pub fn compute_class_weights(y: &[usize]) -> BTreeMap<usize, f64> {
    let counts = class_counts(y);
    let n = y.len() as f64;
    let k = counts.len() as f64;

    counts
        .into_iter()
        .map(|(class, count)| (class, n / (k * count as f64)))
        .collect()
}

/// Per-row weights derived from inverse class frequency
pub fn sample_weights(y: &[usize]) -> Vec<f64> {
    let weights = compute_class_weights(y);
    y.iter()
        .map(|class| weights.get(class).copied().unwrap_or(0.0))
        .collect()
}

/// Balanced class weights for a bootstrap draw given as per-row counts
pub fn bootstrap_class_weights(y: &[usize], counts: &[usize]) -> BTreeMap<usize, f64> {
    let mut per_class: BTreeMap<usize, usize> = BTreeMap::new();
    for (&class, &count) in y.iter().zip(counts) {
        if count > 0 {
            *per_class.entry(class).or_insert(0) += count;
        }
    }

    let n: usize = per_class.values().sum();
    let k = per_class.len() as f64;
    per_class
        .into_iter()
        .map(|(class, count)| (class, n as f64 / (k * count as f64)))
        .collect()
}

pub fn class_counts(y: &[usize]) -> BTreeMap<usize, usize> {
    let mut counts = BTreeMap::new();
    for &class in y {
        *counts.entry(class).or_insert(0) += 1;
    }
    counts
}
