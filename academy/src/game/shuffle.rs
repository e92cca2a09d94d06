//! Deterministic shuffle-index sequences.
//!
//! A shuffle is stored as its Fisher-Yates control sequence rather than as
//! the permuted deck: `n - 1` draws, the k-th uniform in `[0, n-1-k]`.
//! Client and server can both replay the sequence over the ordered card
//! catalogue and arrive at the identical deck, and the server can check a
//! client-supplied sequence for internal consistency without trusting the
//! client's RNG.

use rand::Rng;

use super::constants::VALUES_PER_SUIT;

/// Generate a shuffle-index sequence for a deck of `n` cards.
///
/// The sequence has length `n - 1`; applying it with
/// [`shuffle_with_indices`] performs a uniform Fisher-Yates shuffle when
/// `rng` is uniform. Pass a seeded [`rand::rngs::StdRng`] for a
/// reproducible sequence.
pub fn generate_shuffle_indices<R: Rng + ?Sized>(n: usize, rng: &mut R) -> Vec<i32> {
    let mut indices = Vec::with_capacity(n.saturating_sub(1));
    for i in (1..n).rev() {
        indices.push(rng.random_range(0..=i) as i32);
    }
    indices
}

/// Generate a shuffle-index sequence for a `player_count`-player deck.
pub fn generate_shuffle_indices_for_players<R: Rng + ?Sized>(
    player_count: usize,
    rng: &mut R,
) -> Vec<i32> {
    generate_shuffle_indices(player_count * VALUES_PER_SUIT, rng)
}

/// Check that `indices` is a structurally valid shuffle for a deck of `n`
/// cards: correct length and every element within its Fisher-Yates bound.
/// Touches no randomness.
pub fn is_valid_shuffle(indices: &[i32], n: usize) -> bool {
    if indices.len() + 1 != n {
        return false;
    }

    (1..n)
        .rev()
        .zip(indices)
        .all(|(i, &v)| v >= 0 && (v as usize) <= i)
}

/// Check `indices` against the deck size of a `player_count`-player game.
pub fn is_valid_shuffle_for_players(indices: &[i32], player_count: usize) -> bool {
    is_valid_shuffle(indices, player_count * VALUES_PER_SUIT)
}

/// Apply a shuffle-index sequence to `deck` in place.
///
/// This is the backward Fisher-Yates pass: for `i` from `n - 1` down to 1,
/// `deck[i]` is swapped with `deck[indices[n - 1 - i]]`.
///
/// # Panics
///
/// Panics if `indices` does not satisfy [`is_valid_shuffle`] for
/// `deck.len()`; callers validate client-supplied sequences first.
pub fn shuffle_with_indices<T>(deck: &mut [T], indices: &[i32]) {
    let n = deck.len();
    assert!(is_valid_shuffle(indices, n), "invalid shuffle indices");

    for i in (1..n).rev() {
        let j = indices[n - 1 - i] as usize;
        deck.swap(i, j);
    }
}

/// The sequence that leaves a deck of `n` cards in catalogue order.
pub fn identity_indices(n: usize) -> Vec<i32> {
    (1..n).rev().map(|i| i as i32).collect()
}
