//! Without-replacement draw over the eligible pool.

use rand::{Rng, seq::SliceRandom as _};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectionError {
    #[error("There are too many choices: {requested}/{available}")]
    TooManyChoices { requested: usize, available: usize },
}

/// Human members minus exact-match exclusions, in their original order.
/// Exclusions that match nobody are ignored.
#[must_use]
pub fn eligible(humans: Vec<String>, exclusions: &[String]) -> Vec<String> {
    humans
        .into_iter()
        .filter(|id| !exclusions.contains(id))
        .collect()
}

/// Number of picks requested by the argument. Anything but a positive
/// integer falls back to one.
#[must_use]
pub fn requested_count(argument: &str) -> usize {
    argument
        .trim()
        .parse::<usize>()
        .ok()
        .filter(|n| *n > 0)
        .unwrap_or(1)
}

/// Picks `count` distinct ids from `pool`.
///
/// When `count` equals the pool size the pool comes back as is and `rng` is
/// not touched. Otherwise the first `count` steps of a Fisher-Yates shuffle
/// run over a copy of the pool and the result is in draw order.
pub fn select<R: Rng + ?Sized>(
    pool: &[String],
    count: usize,
    rng: &mut R,
) -> Result<Vec<String>, SelectionError> {
    if count > pool.len() {
        return Err(SelectionError::TooManyChoices {
            requested: count,
            available: pool.len(),
        });
    }
    if count == pool.len() {
        return Ok(pool.to_vec());
    }
    let mut work = pool.to_vec();
    let (chosen, _) = work.partial_shuffle(rng, count);
    Ok(chosen.to_vec())
}
