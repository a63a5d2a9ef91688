//! Client-side helpers for native subscribers.
//!
//! Authoritative state is whatever the latest `room` / `player` snapshot
//! says; every flag a UI needs is derived from it here. The only local state
//! is `EffectOnce`, which remembers which one-shot effects this client has
//! already run.

use std::collections::HashSet;
use std::fmt;
use std::hash::Hash;

use spacetimedb::Identity;

use crate::errors::BidError;
use crate::lifecycle::Lifecycle;
use crate::timer::Countdown;
use crate::{Player, Room};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transition {
    AutoReveal,
    WinnerShown,
    LockedBidNotice,
}

/// Runs an effect at most once per key.
#[derive(Debug, Clone)]
pub struct EffectOnce<K> {
    fired: HashSet<K>,
}

impl<K: Eq + Hash> Default for EffectOnce<K> {
    fn default() -> Self {
        Self { fired: HashSet::new() }
    }
}

impl<K: Eq + Hash> EffectOnce<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// True the first time `key` is seen, false afterwards.
    pub fn fire(&mut self, key: K) -> bool {
        self.fired.insert(key)
    }

    pub fn has_fired(&self, key: &K) -> bool {
        self.fired.contains(key)
    }

    /// Allow `key` to fire again, e.g. after the effect's transaction failed.
    pub fn rearm(&mut self, key: &K) {
        self.fired.remove(key);
    }

    pub fn clear(&mut self) {
        self.fired.clear();
    }
}

/// Effects keyed by `(round_number, transition)`.
pub type RoundEffects = EffectOnce<(u32, Transition)>;

/// Fallback reveal trigger: the round is running, this client has a loaded
/// clock reading zero, nobody has revealed yet, and this client hasn't tried
/// for this round. Settlement itself is idempotent, this only avoids spamming it.
pub fn auto_reveal_due(room: &Room, countdown: &Countdown, now_ms: i64, effects: &mut RoundEffects) -> bool {
    if room.lifecycle != Lifecycle::Running || room.revealed_winner.is_some() {
        return false;
    }
    match countdown.remaining(now_ms) {
        Some(0) => effects.fire((room.round_number, Transition::AutoReveal)),
        _ => false,
    }
}

/// Winner banner: once per round, and only after the local clock agrees.
pub fn winner_notice_due(view: &RoomView<'_>, countdown: &Countdown, now_ms: i64, effects: &mut RoundEffects) -> bool {
    view.show_winner(countdown, now_ms) && effects.fire((view.room.round_number, Transition::WinnerShown))
}

/// "You locked in" notice: once per lock. Losing the lead (a raise) re-arms it.
pub fn locked_notice_due(view: &RoomView<'_>, effects: &mut RoundEffects) -> bool {
    let key = (view.room.round_number, Transition::LockedBidNotice);
    if view.is_leader() {
        effects.fire(key)
    } else {
        effects.rearm(&key);
        false
    }
}

/// Explain a failed `attempt_bid` call from the snapshots that arrive with it.
///
/// The reducer rolls back on every rejection, so the same checks run in the
/// same order against the latest room and own player row. If none of them
/// explain the failure it was transient (connection, store), and `message`
/// is kept for the retry prompt.
pub fn classify_bid_failure(
    room: Option<&Room>,
    me: Option<&Player>,
    attempted_price: u64,
    now_ms: i64,
    message: &str,
) -> BidError {
    let Some(room) = room else {
        return BidError::NoRoom;
    };
    if !room.is_bidding_open(now_ms) {
        return BidError::RoundClosed;
    }
    if room.current_bid != attempted_price {
        return BidError::PriceChanged { expected: attempted_price, current: room.current_bid };
    }
    let Some(me) = me else {
        return BidError::NotJoined;
    };
    if me.balance < attempted_price {
        return BidError::InsufficientFunds { required: attempted_price, balance: me.balance };
    }
    match room.leader_at_current_price() {
        Some(lead) if lead.player != me.identity => {
            BidError::AlreadyClaimed { price: attempted_price, leader_name: lead.name.clone() }
        }
        _ => BidError::TransientFailure(message.to_string()),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomStatus {
    Staged,
    WaitingForBids,
    LockedIn { price: u64, leader_name: String },
    Won { name: String, amount: u64 },
    Finished,
}

impl fmt::Display for RoomStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoomStatus::Staged => write!(f, "Round is staged, waiting for the host to start"),
            RoomStatus::WaitingForBids => write!(f, "Waiting for bids"),
            RoomStatus::LockedIn { price, leader_name } => {
                write!(f, "{} locked in ${}. Wait for the next raise to bid again.", leader_name, price)
            }
            RoomStatus::Won { name, amount } => write!(f, "{} won this round at ${}", name, amount),
            RoomStatus::Finished => write!(f, "Round finished"),
        }
    }
}

/// Flags derived from one snapshot for one viewer.
pub struct RoomView<'a> {
    pub room: &'a Room,
    pub me: Identity,
    pub created_this_session: bool,
}

impl<'a> RoomView<'a> {
    pub fn new(room: &'a Room, me: Identity, created_this_session: bool) -> Self {
        Self { room, me, created_this_session }
    }

    pub fn is_game_host(&self) -> bool {
        crate::roster::is_game_host(self.room, self.me, self.created_this_session)
    }

    /// Holding the lock at the current price.
    pub fn is_leader(&self) -> bool {
        self.room.leader_at_current_price().is_some_and(|lead| lead.player == self.me)
    }

    /// The winner is only shown once the local clock agrees the round is over.
    pub fn show_winner(&self, countdown: &Countdown, now_ms: i64) -> bool {
        self.room.revealed_winner.is_some() && countdown.remaining(now_ms) == Some(0)
    }

    pub fn status(&self, countdown: &Countdown, now_ms: i64) -> RoomStatus {
        if self.show_winner(countdown, now_ms) {
            return match &self.room.revealed_winner {
                Some(w) if w.player.is_some() => RoomStatus::Won { name: w.name.clone(), amount: w.amount },
                _ => RoomStatus::Finished,
            };
        }
        match (self.room.lifecycle, self.room.leader_at_current_price()) {
            (Lifecycle::Staged | Lifecycle::RoundReady, _) => RoomStatus::Staged,
            (_, Some(lead)) => RoomStatus::LockedIn { price: lead.amount, leader_name: lead.name.clone() },
            _ => RoomStatus::WaitingForBids,
        }
    }
}
