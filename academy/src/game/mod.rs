//! Game engine - cards, shuffles, state and reconciliation.
//!
//! This module provides the core of the academy game server:
//! - The card catalogue and per-player deck sizing
//! - Deterministic shuffle-index sequences shared by client and server
//! - The derived game state machine
//! - Reconciliation of client-claimed game histories against server state

pub mod constants;
pub mod entities;
pub mod reconcile;
pub mod shuffle;
pub mod state_machine;
