//! Round settlement and player funds.
//!
//! Settlement is the only place a bid turns into a balance change. It is
//! guarded by `revealed_winner`: the first run writes it, every later run
//! (a second client noticing time-up, the scheduler, the host) sees it and
//! returns `AlreadySettled` without touching anything.

use spacetimedb::Identity;

use crate::errors::{AuctionError, AuctionResult};
use crate::lifecycle::{Lifecycle, RevealedWinner};
use crate::{Player, Room, NO_WINNER_NAME};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    AlreadySettled,
    NoWinner,
    Winner {
        player: Identity,
        name: String,
        amount: u64,
        /// None if the winner's row is gone and nothing could be debited
        balance_after: Option<u64>,
    },
}

/// What a scheduled round timeout should do when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutAction {
    /// Clock reads zero on a live round
    Settle,
    /// Fired early (clock skew, or resumed since scheduling); try again at the deadline
    Reschedule { end_at_ms: i64 },
    /// Paused, settled, or not running. Pausing already cancelled the schedule.
    Skip,
}

pub fn timeout_action(room: &Room, now_ms: i64) -> TimeoutAction {
    if room.lifecycle != Lifecycle::Running || room.revealed_winner.is_some() || room.timer.paused {
        return TimeoutAction::Skip;
    }
    match room.remaining_secs(now_ms) {
        0 => TimeoutAction::Settle,
        _ => TimeoutAction::Reschedule { end_at_ms: room.timer.end_at_ms },
    }
}

/// Deadline a timeout should be scheduled at, if any. None while paused or outside a round.
pub fn timeout_deadline(room: &Room) -> Option<i64> {
    (room.lifecycle == Lifecycle::Running && room.revealed_winner.is_none() && room.timer.is_running())
        .then_some(room.timer.end_at_ms)
}

/// Reject an early reveal; an already settled round passes so the caller can no-op.
pub fn ensure_time_up(room: &Room, now_ms: i64) -> AuctionResult<()> {
    if room.revealed_winner.is_some() {
        return Ok(());
    }
    match room.remaining_secs(now_ms) {
        0 => Ok(()),
        secs => Err(AuctionError::TimeRemaining { secs }),
    }
}

/// Close the round: record the winner, debit them, move to `Revealed`.
///
/// `leader_row` is the player row for `room.leading_bid`, looked up by the
/// caller in the same transaction.
pub fn settle_round(
    room: &mut Room,
    leader_row: Option<&mut Player>,
    now_ms: i64,
) -> AuctionResult<Settlement> {
    if room.revealed_winner.is_some() {
        return Ok(Settlement::AlreadySettled);
    }
    if room.lifecycle != Lifecycle::Running {
        return Err(AuctionError::InvalidTransition { action: "settle the round", from: room.lifecycle });
    }

    let settlement = match room.leading_bid.clone() {
        Some(lead) => {
            let balance_after = leader_row.filter(|row| row.identity == lead.player).map(|row| {
                row.balance = row.balance.saturating_sub(lead.amount);
                row.balance
            });
            room.revealed_winner = Some(RevealedWinner {
                name: lead.name.clone(),
                amount: lead.amount,
                player: Some(lead.player),
                settled_at_ms: now_ms,
            });
            Settlement::Winner { player: lead.player, name: lead.name, amount: lead.amount, balance_after }
        }
        None => {
            room.revealed_winner = Some(RevealedWinner {
                name: NO_WINNER_NAME.to_string(),
                amount: 0,
                player: None,
                settled_at_ms: now_ms,
            });
            Settlement::NoWinner
        }
    };

    room.timer.expire();
    room.lifecycle = Lifecycle::Revealed;
    Ok(settlement)
}

/// Host adjustment by a signed delta, floored at zero.
pub fn adjust_balance(balance: u64, delta: i64) -> u64 {
    if delta >= 0 {
        balance.saturating_add(delta.unsigned_abs())
    } else {
        balance.saturating_sub(delta.unsigned_abs())
    }
}

/// Refill: every current player gets `amount`, and so does everyone who joins later.
pub fn apply_starting_funds(room: &mut Room, players: &mut [Player], amount: u64) {
    room.starting_funds = amount;
    for player in players.iter_mut() {
        player.balance = amount;
    }
}
