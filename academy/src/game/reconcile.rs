//! Game update reconciliation.
//!
//! Clients do not send deltas. Every update carries what the client
//! believes to be the entire card history of the game, and the server
//! merges it against its own record: everything already committed must
//! agree, everything new must agree with the canonical shuffle, and only
//! the new suffix is persisted. This makes retries of the same payload
//! naturally idempotent, which is what lets several phones hammer the same
//! game through a flaky network without corrupting it.
//!
//! [`reconcile`] is a pure function from (snapshot, payload) to either a
//! rejection or a [`Reconciled`] delta; the store applies the delta
//! atomically under the per-game lock.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

use super::constants::{FIX_TIMES_MIN_STEP_MS, MAX_PLAYERS, MIN_PLAYERS};
use super::entities::{ACE, Card, CardRecord, Chug, Game, GamePlayer, Suit, UserId, Value};
use crate::auth::User;

/// One card as claimed by a client.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct CardUpdate {
    pub value: Value,
    pub suit: Suit,
    pub start_delta_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chug_start_delta_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chug_duration_ms: Option<i64>,
}

impl CardUpdate {
    pub fn card(&self) -> Card {
        Card(self.value, self.suit)
    }

    /// The completed chug carried by this card, if any. A start offset
    /// without a duration is a chug still in progress and is not
    /// persisted yet.
    pub fn chug(&self) -> Option<Chug> {
        self.chug_duration_ms.map(|duration_ms| Chug {
            start_delta_ms: self.chug_start_delta_ms,
            duration_ms,
        })
    }

    fn has_chug_fields(&self) -> bool {
        self.chug_start_delta_ms.is_some() || self.chug_duration_ms.is_some()
    }
}

/// A client's claimed full game state.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct GameUpdate {
    pub start_datetime: DateTime<Utc>,
    pub official: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub shuffle_indices: Vec<i32>,
    pub player_ids: Vec<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_names: Option<Vec<String>>,
    pub cards: Vec<CardUpdate>,
    pub has_ended: bool,
    #[serde(default)]
    pub dnf_player_ids: Vec<UserId>,
}

/// Administrative switches. Both default to off; the public update
/// endpoint never sets them.
#[derive(Clone, Copy, Debug, Default)]
pub struct ReconcileOptions {
    /// Bypass mismatch rejections against already-recorded values
    /// (immutable fields, committed card/chug data). Structural checks
    /// (counts, shuffle agreement, chug completeness) and the stored
    /// shuffle indices are never bypassed.
    pub allow_overwrite: bool,
    /// Instead of rejecting non-monotonic timestamps, push the offending
    /// value forward to `previous + 13s` and cascade the shift to every
    /// later value, reporting the corrections. For repairing historic
    /// imports only.
    pub fix_times: bool,
}

impl ReconcileOptions {
    pub const STRICT: Self = Self {
        allow_overwrite: false,
        fix_times: false,
    };
}

/// Rejection reasons, one per failed validation step. A rejection leaves
/// server state untouched.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum ReconcileError {
    #[error("game has already finished")]
    GameAlreadyFinished,
    #[error("{field} differs from the value the server has recorded")]
    ImmutableFieldMismatch { field: &'static str },
    #[error("invalid player list: {reason}")]
    InvalidRoster { reason: String },
    #[error("dnf players must be a subset of the game's players")]
    InvalidDnfSubset,
    #[error("fewer cards than the server has recorded")]
    CardCountRegression,
    #[error("more cards than the deck holds")]
    CardCountOverflow,
    #[error("can't end the game before every card is drawn")]
    PrematureCompletion,
    #[error("timestamps are not increasing at position {position}")]
    NonMonotonicTime { position: usize },
    #[error("card {index} is an ace with missing chug data")]
    MissingChugData { index: usize },
    #[error("card {index} has chug data but is not an ace")]
    UnexpectedChug { index: usize },
    #[error("card {index} has different data than the server")]
    CardDataMismatch { index: usize },
    #[error("card {index} has different chug data than the server")]
    ChugDataMismatch { index: usize },
    #[error("card {index} does not match the deck the shuffle produces")]
    ShuffleMismatch { index: usize },
}

impl ReconcileError {
    /// The payload field a rejection belongs to, for per-field error maps.
    pub fn field(&self) -> &'static str {
        match self {
            Self::GameAlreadyFinished => "non_field_errors",
            Self::ImmutableFieldMismatch { field } => field,
            Self::InvalidRoster { .. } => "player_ids",
            Self::InvalidDnfSubset => "dnf_player_ids",
            Self::CardCountRegression
            | Self::CardCountOverflow
            | Self::PrematureCompletion
            | Self::NonMonotonicTime { .. }
            | Self::MissingChugData { .. }
            | Self::UnexpectedChug { .. }
            | Self::CardDataMismatch { .. }
            | Self::ChugDataMismatch { .. }
            | Self::ShuffleMismatch { .. } => "cards",
        }
    }
}

/// A timestamp rewritten by the fix-times mode.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub struct TimeCorrection {
    /// Position in the flattened timestamp sequence.
    pub position: usize,
    pub from_ms: i64,
    pub to_ms: i64,
}

/// The delta an accepted update applies to the server state.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Reconciled {
    /// Roster to attach, in position order. Set on the first accepted
    /// update only.
    pub players: Option<Vec<UserId>>,
    /// New description, when the payload introduced one.
    pub description: Option<String>,
    /// Cards beyond what the server already holds, in index order.
    pub new_cards: Vec<CardRecord>,
    /// Chug data landing on the last previously-committed card, for the
    /// case where the chug finished after the card was already reported.
    pub completed_chug: Option<(usize, Chug)>,
    /// Full replacement for the per-player dnf flags.
    pub dnf_player_ids: BTreeSet<UserId>,
    /// End time, set exactly once when the update completes the game.
    pub end_datetime: Option<DateTime<Utc>>,
    /// Audit trail of fix-times rewrites; empty in strict mode.
    pub time_corrections: Vec<TimeCorrection>,
}

impl Reconciled {
    /// Whether applying this delta finishes the game. Drives the
    /// game-finished hooks; a replay of an already-finished game never
    /// sets this.
    pub fn finishes_game(&self) -> bool {
        self.end_datetime.is_some()
    }

    /// Apply this delta to a snapshot. `roster` supplies the resolved
    /// users when the delta populates the player list and is ignored
    /// otherwise. Stores use this to build the post-update snapshot; it
    /// must mirror what they persist.
    pub fn apply_to(&self, game: &mut Game, roster: &[User]) {
        if self.players.is_some() {
            game.players = roster
                .iter()
                .enumerate()
                .map(|(position, user)| GamePlayer {
                    user_id: user.id,
                    username: user.username.clone(),
                    position,
                    dnf: false,
                })
                .collect();
        }
        if let Some(description) = &self.description {
            game.description = description.clone();
        }
        if let Some((index, chug)) = self.completed_chug
            && let Some(card) = game.cards.get_mut(index)
        {
            card.chug = Some(chug);
        }
        game.cards.extend(self.new_cards.iter().cloned());
        for player in &mut game.players {
            player.dnf = self.dnf_player_ids.contains(&player.user_id);
        }
        if self.end_datetime.is_some() {
            game.end_datetime = self.end_datetime;
        }
    }
}

/// Validate a client's claimed state against the server snapshot and
/// compute the delta to apply.
///
/// Validation steps run in a fixed order and each produces its own
/// [`ReconcileError`]. Against a finished game, the payload is accepted
/// only if it replays the recorded state exactly (an idempotent retry), in
/// which case the returned delta is empty.
pub fn reconcile(
    game: &Game,
    update: GameUpdate,
    opts: &ReconcileOptions,
) -> Result<Reconciled, ReconcileError> {
    if game.has_ended() && !opts.allow_overwrite {
        let outcome = validate(game, update, &ReconcileOptions::STRICT)
            .map_err(|_| ReconcileError::GameAlreadyFinished)?;
        if is_replay(game, &outcome) {
            return Ok(Reconciled {
                dnf_player_ids: current_dnf_ids(game),
                ..Reconciled::default()
            });
        }
        return Err(ReconcileError::GameAlreadyFinished);
    }

    validate(game, update, opts)
}

fn validate(
    game: &Game,
    mut update: GameUpdate,
    opts: &ReconcileOptions,
) -> Result<Reconciled, ReconcileError> {
    check_immutable_fields(game, &update, opts)?;
    let description = resolve_description(game, update.description.as_deref(), opts)?;
    let players = resolve_roster(game, &update)?;

    let roster_ids: BTreeSet<UserId> = update.player_ids.iter().copied().collect();
    if !update.dnf_player_ids.iter().all(|id| roster_ids.contains(id)) {
        return Err(ReconcileError::InvalidDnfSubset);
    }

    let previous = game.cards.len();
    let total = game.deck_size();
    if update.cards.len() < previous {
        return Err(ReconcileError::CardCountRegression);
    }
    if update.cards.len() > total {
        return Err(ReconcileError::CardCountOverflow);
    }
    if update.has_ended && update.cards.len() < total {
        return Err(ReconcileError::PrematureCompletion);
    }

    let time_corrections = enforce_monotonic_times(&mut update.cards, opts.fix_times)?;
    check_chug_shape(&update)?;
    let completed_chug = check_committed_cards(game, &update, opts)?;
    let new_cards = check_new_cards(game, &update)?;

    let end_datetime = if update.has_ended {
        Some(derive_end_datetime(game, &update))
    } else {
        None
    };

    Ok(Reconciled {
        players,
        description,
        new_cards,
        completed_chug,
        dnf_player_ids: update.dnf_player_ids.iter().copied().collect(),
        end_datetime,
        time_corrections,
    })
}

fn check_immutable_fields(
    game: &Game,
    update: &GameUpdate,
    opts: &ReconcileOptions,
) -> Result<(), ReconcileError> {
    // The shuffle indices anchor every card-agreement check below, so not
    // even an administrative overwrite may change them.
    if update.shuffle_indices != game.shuffle_indices {
        return Err(ReconcileError::ImmutableFieldMismatch {
            field: "shuffle_indices",
        });
    }

    if opts.allow_overwrite {
        return Ok(());
    }

    if update.start_datetime != game.start_datetime {
        return Err(ReconcileError::ImmutableFieldMismatch {
            field: "start_datetime",
        });
    }
    if update.official != game.official {
        return Err(ReconcileError::ImmutableFieldMismatch { field: "official" });
    }

    Ok(())
}

fn resolve_description(
    game: &Game,
    claimed: Option<&str>,
    opts: &ReconcileOptions,
) -> Result<Option<String>, ReconcileError> {
    match claimed {
        Some(description) if description == game.description => Ok(None),
        Some(description) => {
            if game.description.is_empty() || opts.allow_overwrite {
                Ok(Some(description.to_string()))
            } else {
                Err(ReconcileError::ImmutableFieldMismatch {
                    field: "description",
                })
            }
        }
        None => {
            if game.description.is_empty() || opts.allow_overwrite {
                Ok(None)
            } else {
                Err(ReconcileError::ImmutableFieldMismatch {
                    field: "description",
                })
            }
        }
    }
}

fn resolve_roster(game: &Game, update: &GameUpdate) -> Result<Option<Vec<UserId>>, ReconcileError> {
    if let Some(names) = &update.player_names
        && names.len() != update.player_ids.len()
    {
        return Err(ReconcileError::InvalidRoster {
            reason: "player names and ids differ in length".to_string(),
        });
    }

    if !game.players.is_empty() {
        let server_ids: Vec<UserId> = game.players.iter().map(|p| p.user_id).collect();
        if update.player_ids != server_ids {
            return Err(ReconcileError::ImmutableFieldMismatch { field: "player_ids" });
        }
        if let Some(names) = &update.player_names {
            let matches = game
                .players
                .iter()
                .zip(names)
                .all(|(p, name)| p.username == *name);
            if !matches {
                return Err(ReconcileError::ImmutableFieldMismatch {
                    field: "player_names",
                });
            }
        }
        return Ok(None);
    }

    let count = update.player_ids.len();
    if !(MIN_PLAYERS..=MAX_PLAYERS).contains(&count) {
        return Err(ReconcileError::InvalidRoster {
            reason: format!("expected {MIN_PLAYERS}-{MAX_PLAYERS} players, got {count}"),
        });
    }
    if count != game.expected_player_count() {
        return Err(ReconcileError::InvalidRoster {
            reason: format!(
                "game was created for {} players, got {count}",
                game.expected_player_count()
            ),
        });
    }
    let unique: BTreeSet<UserId> = update.player_ids.iter().copied().collect();
    if unique.len() != count {
        return Err(ReconcileError::InvalidRoster {
            reason: "same player appears twice".to_string(),
        });
    }

    Ok(Some(update.player_ids.clone()))
}

/// Walk every timestamp-like value in submission order and require it to
/// be non-negative and non-decreasing. With `fix` set, an offending value
/// is instead pushed to `previous + FIX_TIMES_MIN_STEP_MS` and the shift
/// carries forward to every later value.
fn enforce_monotonic_times(
    cards: &mut [CardUpdate],
    fix: bool,
) -> Result<Vec<TimeCorrection>, ReconcileError> {
    let mut corrections = Vec::new();
    let mut shift: i64 = 0;
    let mut prev: i64 = 0;
    let mut position = 0;

    let mut advance = |raw: i64, shift: &mut i64, prev: &mut i64, position: &mut usize| {
        let shifted = raw + *shift;
        let value = if shifted < *prev {
            if !fix {
                return Err(ReconcileError::NonMonotonicTime {
                    position: *position,
                });
            }
            let target = *prev + FIX_TIMES_MIN_STEP_MS;
            corrections.push(TimeCorrection {
                position: *position,
                from_ms: raw,
                to_ms: target,
            });
            *shift += target - shifted;
            target
        } else {
            shifted
        };
        *prev = value;
        *position += 1;
        Ok(value)
    };

    for card in cards.iter_mut() {
        card.start_delta_ms = advance(card.start_delta_ms, &mut shift, &mut prev, &mut position)?;

        if let Some(chug_start) = card.chug_start_delta_ms {
            card.chug_start_delta_ms =
                Some(advance(chug_start, &mut shift, &mut prev, &mut position)?);
        }

        if let Some(duration) = card.chug_duration_ms {
            // The chug's end participates in the sequence; a correction
            // here stretches the duration rather than moving the start.
            let base = card.chug_start_delta_ms.unwrap_or(card.start_delta_ms);
            let end = advance(base.saturating_add(duration), &mut shift, &mut prev, &mut position)?;
            card.chug_duration_ms = Some(end - base);
        }
    }

    Ok(corrections)
}

fn check_chug_shape(update: &GameUpdate) -> Result<(), ReconcileError> {
    let last = update.cards.len().wrapping_sub(1);
    for (i, card) in update.cards.iter().enumerate() {
        if card.value != ACE {
            if card.has_chug_fields() {
                return Err(ReconcileError::UnexpectedChug { index: i });
            }
            continue;
        }

        // Only the newest card may still be waiting on its chug, and only
        // while the game is not being completed.
        if card.chug_duration_ms.is_none() && (i != last || update.has_ended) {
            return Err(ReconcileError::MissingChugData { index: i });
        }
    }
    Ok(())
}

/// Compare the payload against every card the server has committed.
/// Committed cards are never rewritten; the only state a committed card
/// can gain is chug data on the newest of them.
fn check_committed_cards(
    game: &Game,
    update: &GameUpdate,
    opts: &ReconcileOptions,
) -> Result<Option<(usize, Chug)>, ReconcileError> {
    let mut completed_chug = None;

    for (i, (stored, claimed)) in game.cards.iter().zip(&update.cards).enumerate() {
        let same = stored.value == claimed.value
            && stored.suit == claimed.suit
            && stored.start_delta_ms == claimed.start_delta_ms;
        if !same && !opts.allow_overwrite {
            return Err(ReconcileError::CardDataMismatch { index: i });
        }

        match (stored.chug, claimed.chug()) {
            (Some(stored_chug), Some(claimed_chug)) if stored_chug != claimed_chug => {
                if !opts.allow_overwrite {
                    return Err(ReconcileError::ChugDataMismatch { index: i });
                }
            }
            (Some(_), None) => {
                if !opts.allow_overwrite {
                    return Err(ReconcileError::ChugDataMismatch { index: i });
                }
            }
            (None, Some(claimed_chug)) => {
                if i + 1 == game.cards.len() {
                    completed_chug = Some((i, claimed_chug));
                } else {
                    return Err(ReconcileError::ChugDataMismatch { index: i });
                }
            }
            _ => {}
        }
    }

    Ok(completed_chug)
}

/// Every card past the committed prefix must read exactly what the
/// canonical shuffle puts at its index.
fn check_new_cards(game: &Game, update: &GameUpdate) -> Result<Vec<CardRecord>, ReconcileError> {
    let deck = game.shuffled_deck();
    let previous = game.cards.len();
    let mut new_cards = Vec::with_capacity(update.cards.len() - previous);

    for (i, claimed) in update.cards.iter().enumerate().skip(previous) {
        if claimed.card() != deck[i] {
            return Err(ReconcileError::ShuffleMismatch { index: i });
        }
        new_cards.push(CardRecord {
            index: i,
            value: claimed.value,
            suit: claimed.suit,
            start_delta_ms: claimed.start_delta_ms,
            chug: claimed.chug(),
        });
    }

    Ok(new_cards)
}

/// End time of a completing game: the game start plus the last card's
/// effective offset, which is the chug's end when the deck finishes on an
/// ace.
fn derive_end_datetime(game: &Game, update: &GameUpdate) -> DateTime<Utc> {
    let offset = update
        .cards
        .last()
        .map(|last| match last.chug() {
            Some(chug) if last.card().is_ace() => chug.end_delta_ms(last.start_delta_ms),
            _ => last.start_delta_ms,
        })
        .unwrap_or(0);

    game.start_datetime + TimeDelta::milliseconds(offset)
}

fn current_dnf_ids(game: &Game) -> BTreeSet<UserId> {
    game.players
        .iter()
        .filter(|p| p.dnf)
        .map(|p| p.user_id)
        .collect()
}

/// Whether an already-validated outcome replays a finished game without
/// changing anything.
fn is_replay(game: &Game, outcome: &Reconciled) -> bool {
    outcome.players.is_none()
        && outcome.description.is_none()
        && outcome.new_cards.is_empty()
        && outcome.completed_chug.is_none()
        && outcome.end_datetime == game.end_datetime
        && outcome.dnf_player_ids == current_dnf_ids(game)
}
