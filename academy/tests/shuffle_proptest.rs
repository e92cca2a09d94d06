//! Property-based tests for the shuffle engine.
//!
//! These verify the contract both sides of the protocol rely on: every
//! generated sequence validates, every valid sequence permutes the deck
//! without losing or duplicating a card, and replaying a sequence is
//! deterministic.

use academy::game::entities::{ordered_cards_for_players, shuffled_deck};
use academy::game::shuffle;
use proptest::prelude::*;
use rand::{SeedableRng, rngs::StdRng};
use std::collections::BTreeSet;

proptest! {
    #[test]
    fn test_generated_sequences_have_length_n_minus_one(
        players in 2usize..=6,
        seed in any::<u64>(),
    ) {
        let mut rng = StdRng::seed_from_u64(seed);
        let indices = shuffle::generate_shuffle_indices_for_players(players, &mut rng);
        prop_assert_eq!(indices.len(), players * 13 - 1);
        prop_assert!(shuffle::is_valid_shuffle_for_players(&indices, players));
    }

    #[test]
    fn test_apply_is_a_bijection_on_the_deck(
        players in 2usize..=6,
        seed in any::<u64>(),
    ) {
        let mut rng = StdRng::seed_from_u64(seed);
        let indices = shuffle::generate_shuffle_indices_for_players(players, &mut rng);

        let deck = shuffled_deck(players, &indices);
        prop_assert_eq!(deck.len(), players * 13);

        let unique: BTreeSet<_> = deck.iter().copied().collect();
        prop_assert_eq!(unique.len(), deck.len(), "no duplicates or drops");

        let mut sorted = deck.clone();
        sorted.sort();
        let mut catalogue = ordered_cards_for_players(players);
        catalogue.sort();
        prop_assert_eq!(sorted, catalogue, "output is a permutation of the catalogue");
    }

    #[test]
    fn test_replaying_a_sequence_is_deterministic(
        players in 2usize..=6,
        seed in any::<u64>(),
    ) {
        let mut rng = StdRng::seed_from_u64(seed);
        let indices = shuffle::generate_shuffle_indices_for_players(players, &mut rng);

        // Server and client each derive the deck independently.
        prop_assert_eq!(shuffled_deck(players, &indices), shuffled_deck(players, &indices));
    }

    #[test]
    fn test_out_of_bounds_element_fails_validation(
        players in 2usize..=6,
        seed in any::<u64>(),
        raw_pos in any::<usize>(),
    ) {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut indices = shuffle::generate_shuffle_indices_for_players(players, &mut rng);

        let n = players * 13;
        let pos = raw_pos % indices.len();
        // Element at pos is bounded by n - 1 - pos; push it just past.
        indices[pos] = (n - pos) as i32;
        prop_assert!(!shuffle::is_valid_shuffle_for_players(&indices, players));
    }

    #[test]
    fn test_truncated_sequence_fails_validation(
        players in 2usize..=6,
        seed in any::<u64>(),
    ) {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut indices = shuffle::generate_shuffle_indices_for_players(players, &mut rng);
        indices.pop();
        prop_assert!(!shuffle::is_valid_shuffle_for_players(&indices, players));
    }
}
