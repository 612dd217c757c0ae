// ============================================================
// Layer 4 — Train/Validation Splitter
// ============================================================
// Shuffles samples with a seeded RNG and splits them into
// (train, validation). Used only when a validation fraction
// is configured; with fraction 0.0 everything is training data
// and the input order is kept.
//
// The seed makes the split reproducible across runs of the
// same dataset.
//
// Reference: rand crate documentation (SliceRandom, StdRng)

use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

/// Shuffle `samples` and move `validation_fraction` of them into
/// the second returned Vec.
///
/// # Example
/// ```ignore
/// let (train, val) = split_train_val(all_samples, 0.1, 42);
/// ```
pub fn split_train_val<T>(
    mut samples:         Vec<T>,
    validation_fraction: f64,
    seed:                u64,
) -> (Vec<T>, Vec<T>) {
    if validation_fraction <= 0.0 {
        return (samples, Vec::new());
    }

    let mut rng = StdRng::seed_from_u64(seed);
    samples.shuffle(&mut rng);

    let total    = samples.len();
    let val_size = ((total as f64) * validation_fraction.min(1.0)).round() as usize;
    let split_at = total - val_size.min(total);

    let val = samples.split_off(split_at);

    tracing::debug!(
        "Dataset split: {} training, {} validation",
        samples.len(),
        val.len(),
    );

    (samples, val)
}
