//! Cards, decks and the persisted game snapshot.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use super::constants::VALUES_PER_SUIT;
use super::shuffle;

/// Card values run 2..=10, then Jack=11, Queen=12, King=13, Ace=14.
pub type Value = u8;

pub const MIN_VALUE: Value = 2;
pub const ACE: Value = 14;

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum Suit {
    #[serde(rename = "S")]
    Spades,
    #[serde(rename = "C")]
    Clubs,
    #[serde(rename = "H")]
    Hearts,
    #[serde(rename = "D")]
    Diamonds,
    #[serde(rename = "A")]
    Carls,
    #[serde(rename = "I")]
    Heineken,
}

impl Suit {
    /// Catalogue order. An n-player game uses the first n suits.
    pub const ALL: [Suit; 6] = [
        Self::Spades,
        Self::Clubs,
        Self::Hearts,
        Self::Diamonds,
        Self::Carls,
        Self::Heineken,
    ];

    /// One-letter code used on the wire and in the database.
    pub fn code(self) -> &'static str {
        match self {
            Self::Spades => "S",
            Self::Clubs => "C",
            Self::Hearts => "H",
            Self::Diamonds => "D",
            Self::Carls => "A",
            Self::Heineken => "I",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.code() == code)
    }
}

impl fmt::Display for Suit {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let repr = match self {
            Self::Spades => "♠",
            Self::Clubs => "♣",
            Self::Hearts => "♥",
            Self::Diamonds => "♦",
            Self::Carls => "☘",
            Self::Heineken => "🟊",
        };
        write!(f, "{repr}")
    }
}

/// A card is a value and a suit. Identity is unique within a game.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct Card(pub Value, pub Suit);

impl Card {
    pub fn is_ace(self) -> bool {
        self.0 == ACE
    }
}

impl fmt::Display for Card {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let value = match self.0 {
            11 => "J",
            12 => "Q",
            13 => "K",
            14 => "A",
            v => &v.to_string(),
        };
        write!(f, "{value}{}", self.1)
    }
}

/// Number of cards in a `player_count`-player deck.
pub fn total_card_count(player_count: usize) -> usize {
    player_count * VALUES_PER_SUIT
}

/// The unshuffled card catalogue for a `player_count`-player game:
/// the first `player_count` suits in catalogue order, values 2..=14
/// within each suit.
pub fn ordered_cards_for_players(player_count: usize) -> Vec<Card> {
    let mut cards = Vec::with_capacity(total_card_count(player_count));
    for suit in &Suit::ALL[..player_count] {
        for value in MIN_VALUE..=ACE {
            cards.push(Card(value, *suit));
        }
    }
    cards
}

/// The canonical deck order for a game: the ordered catalogue permuted by
/// the game's stored shuffle indices.
pub fn shuffled_deck(player_count: usize, indices: &[i32]) -> Vec<Card> {
    let mut deck = ordered_cards_for_players(player_count);
    shuffle::shuffle_with_indices(&mut deck, indices);
    deck
}

pub type GameId = i64;
pub type UserId = i64;

/// A player's seat in one game. Positions are assigned at creation and
/// never reordered; `dnf` marks a player who bailed while the game went on.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct GamePlayer {
    pub user_id: UserId,
    pub username: String,
    pub position: usize,
    pub dnf: bool,
}

/// A completed chug on an ace. `start_delta_ms` can be missing on rows
/// imported from before chug start times were recorded.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Chug {
    pub start_delta_ms: Option<i64>,
    pub duration_ms: i64,
}

impl Chug {
    /// Offset from game start at which the chug finished, falling back to
    /// the card's own draw offset when no start was recorded.
    pub fn end_delta_ms(&self, card_start_delta_ms: i64) -> i64 {
        self.start_delta_ms.unwrap_or(card_start_delta_ms) + self.duration_ms
    }
}

/// One drawn card. `index` is the card's position in the shuffled deck and
/// the order of play; draws are dense and strictly increasing.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct CardRecord {
    pub index: usize,
    pub value: Value,
    pub suit: Suit,
    pub start_delta_ms: i64,
    pub chug: Option<Chug>,
}

impl CardRecord {
    pub fn card(&self) -> Card {
        Card(self.value, self.suit)
    }
}

/// Where a game was played, recorded at creation.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub struct GameLocation {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: Option<f64>,
}

/// A full game snapshot as loaded from the store.
///
/// The current phase of play is not a stored field; it is derived from the
/// snapshot by [`Game::state`](crate::game::state_machine) so the state can
/// never drift from the data.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Game {
    pub id: GameId,
    pub start_datetime: DateTime<Utc>,
    pub end_datetime: Option<DateTime<Utc>>,
    pub official: bool,
    pub dnf: bool,
    pub shuffle_indices: Vec<i32>,
    pub sips_per_beer: i32,
    pub description: String,
    pub location: Option<GameLocation>,
    pub players: Vec<GamePlayer>,
    pub cards: Vec<CardRecord>,
}

impl Game {
    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    /// Deck size implied by the stored shuffle indices. Valid before the
    /// roster has been populated.
    pub fn deck_size(&self) -> usize {
        self.shuffle_indices.len() + 1
    }

    /// Player count implied by the stored shuffle indices.
    pub fn expected_player_count(&self) -> usize {
        self.deck_size() / VALUES_PER_SUIT
    }

    /// A game is over once it has an end time or was abandoned.
    pub fn has_ended(&self) -> bool {
        self.end_datetime.is_some() || self.dnf
    }

    pub fn shuffled_deck(&self) -> Vec<Card> {
        shuffled_deck(self.expected_player_count(), &self.shuffle_indices)
    }

    pub fn duration(&self) -> Option<TimeDelta> {
        self.end_datetime.map(|end| end - self.start_datetime)
    }

    pub fn players_str(&self) -> String {
        self.players
            .iter()
            .map(|p| p.username.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Cards of the full deck not yet drawn, in canonical deck order.
    pub fn cards_left(&self) -> Vec<Card> {
        let drawn: BTreeSet<Card> = self.cards.iter().map(CardRecord::card).collect();
        self.shuffled_deck()
            .into_iter()
            .filter(|c| !drawn.contains(c))
            .collect()
    }
}
