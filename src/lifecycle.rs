//! Room lifecycle: staged -> round ready -> running -> revealed -> round ready ...
//!
//! Everything here is a pure transition over a `Room` row. Reducers load the
//! row, apply one of these, and write it back inside the same transaction.

use spacetimedb::{rand::Rng, Identity, SpacetimeType, Timestamp};

use crate::errors::{AuctionError, AuctionResult};
use crate::timer::TimerState;
use crate::{
    Room, DEFAULT_BASE_BID, DEFAULT_DURATION_SECS, DEFAULT_INCREMENT, DEFAULT_STARTING_FUNDS,
    DEFAULT_THEME, DEFAULT_TITLE, ROOM_CODE_ALPHABET, ROOM_CODE_LEN,
};

#[derive(SpacetimeType, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lifecycle {
    Staged,     // Room just created
    RoundReady, // Price and paused timer set, waiting for start
    Running,    // Timer live, bids accepted
    Revealed,   // Winner settled
}

/// The bid currently holding the lock at `current_bid`.
#[derive(SpacetimeType, Debug, Clone, PartialEq, Eq)]
pub struct LeadingBid {
    pub player: Identity,
    pub name: String,
    pub amount: u64,
    /// Strictly increasing across successive leaders, used as a tie-break
    pub submitted_at_ms: i64,
}

#[derive(SpacetimeType, Debug, Clone, PartialEq, Eq)]
pub struct RevealedWinner {
    pub name: String,
    pub amount: u64,
    /// None when the round closed without a bid
    pub player: Option<Identity>,
    pub settled_at_ms: i64,
}

impl Room {
    pub fn new(code: String, host: Identity, title: Option<String>, created_at: Timestamp) -> Self {
        Room {
            code,
            host,
            title: title
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| DEFAULT_TITLE.to_string()),
            theme: DEFAULT_THEME.to_string(),
            round_number: 1,
            lifecycle: Lifecycle::Staged,
            base_bid: DEFAULT_BASE_BID,
            current_bid: DEFAULT_BASE_BID,
            increment: DEFAULT_INCREMENT,
            current_price_has_bid: false,
            leading_bid: None,
            revealed_winner: None,
            starting_funds: DEFAULT_STARTING_FUNDS,
            timer: TimerState::staged(DEFAULT_DURATION_SECS),
            created_at,
        }
    }

    pub fn is_host(&self, who: Identity) -> bool {
        self.host == who
    }

    pub fn remaining_secs(&self, now_ms: i64) -> u32 {
        self.timer.remaining_secs(self.lifecycle, now_ms)
    }

    /// Bids are accepted only while running with time left (paused included).
    pub fn is_bidding_open(&self, now_ms: i64) -> bool {
        self.lifecycle == Lifecycle::Running && self.remaining_secs(now_ms) > 0
    }

    /// The lock holder, if the lock is on the current price.
    pub fn leader_at_current_price(&self) -> Option<&LeadingBid> {
        if !self.current_price_has_bid {
            return None;
        }
        self.leading_bid.as_ref().filter(|lead| lead.amount == self.current_bid)
    }

    /// Release the lock so the current price can be claimed again.
    pub fn clear_lock(&mut self) {
        self.current_price_has_bid = false;
        self.leading_bid = None;
    }

    fn clear_round_outcome(&mut self) {
        self.clear_lock();
        self.revealed_winner = None;
    }

    fn require(&self, action: &'static str, allowed: &[Lifecycle]) -> AuctionResult<()> {
        if allowed.contains(&self.lifecycle) {
            Ok(())
        } else {
            Err(AuctionError::InvalidTransition { action, from: self.lifecycle })
        }
    }

    /// Staged | RoundReady -> RoundReady. Re-preparing a ready round just rebuilds it.
    pub fn prepare_round(&mut self, duration_sec: Option<u32>) -> AuctionResult<()> {
        self.require("prepare a round", &[Lifecycle::Staged, Lifecycle::RoundReady])?;
        let duration = duration_sec.unwrap_or(self.timer.duration_sec);
        self.current_bid = self.base_bid;
        self.clear_round_outcome();
        self.timer = TimerState::staged(duration);
        self.lifecycle = Lifecycle::RoundReady;
        Ok(())
    }

    /// RoundReady -> Running. A staged room is prepared first.
    pub fn start_round(&mut self, now_ms: i64) -> AuctionResult<()> {
        self.require("start a round", &[Lifecycle::Staged, Lifecycle::RoundReady])?;
        if self.lifecycle == Lifecycle::Staged {
            self.prepare_round(None)?;
        }
        self.clear_round_outcome();
        self.timer.start(now_ms);
        self.lifecycle = Lifecycle::Running;
        Ok(())
    }

    /// A running round whose clock reads zero is owed to its lock holder.
    /// Price changes after that point would erase the winner before settlement.
    fn require_clock(&self, now_ms: i64) -> AuctionResult<()> {
        if self.lifecycle == Lifecycle::Running && self.remaining_secs(now_ms) == 0 {
            return Err(AuctionError::TimerExpired);
        }
        Ok(())
    }

    /// Step the price up by `increment`; the previous leader must re-bid.
    pub fn raise_price(&mut self, now_ms: i64) -> AuctionResult<u64> {
        self.require("raise the price", &[Lifecycle::RoundReady, Lifecycle::Running])?;
        self.require_clock(now_ms)?;
        self.current_bid = self.base_bid.max(self.current_bid.saturating_add(self.increment));
        self.clear_round_outcome();
        Ok(self.current_bid)
    }

    /// New floor for this and later rounds. A settled round keeps its winner.
    pub fn set_base_price(&mut self, price: u64, now_ms: i64) -> AuctionResult<()> {
        self.require_clock(now_ms)?;
        self.base_bid = price;
        self.current_bid = price;
        self.clear_lock();
        if self.lifecycle != Lifecycle::Revealed {
            self.revealed_winner = None;
        }
        Ok(())
    }

    pub fn reset_to_base(&mut self, now_ms: i64) -> AuctionResult<()> {
        self.require("reset the price", &[Lifecycle::RoundReady, Lifecycle::Running])?;
        self.require_clock(now_ms)?;
        self.current_bid = self.base_bid;
        self.clear_round_outcome();
        Ok(())
    }

    pub fn set_increment(&mut self, increment: u64) -> AuctionResult<()> {
        if increment == 0 {
            return Err(AuctionError::InvalidIncrement);
        }
        self.increment = increment;
        Ok(())
    }

    /// Before a round the staged timer is rebuilt; after one only the length is kept for next time.
    pub fn set_timer_duration(&mut self, duration_sec: u32) -> AuctionResult<()> {
        self.require(
            "change the timer",
            &[Lifecycle::Staged, Lifecycle::RoundReady, Lifecycle::Revealed],
        )?;
        if self.lifecycle == Lifecycle::Revealed {
            self.timer.duration_sec = duration_sec.max(1);
        } else {
            self.timer = TimerState::staged(duration_sec);
        }
        Ok(())
    }

    /// Returns false if the timer was already paused.
    pub fn pause_timer(&mut self, now_ms: i64) -> AuctionResult<bool> {
        self.require("pause the timer", &[Lifecycle::Running])?;
        if self.timer.paused {
            return Ok(false);
        }
        if self.remaining_secs(now_ms) == 0 {
            return Err(AuctionError::TimerExpired);
        }
        self.timer.pause(now_ms);
        Ok(true)
    }

    /// Returns false if the timer was not paused.
    pub fn resume_timer(&mut self, now_ms: i64) -> AuctionResult<bool> {
        self.require("resume the timer", &[Lifecycle::Running])?;
        if !self.timer.paused {
            return Ok(false);
        }
        self.timer.resume(now_ms);
        Ok(true)
    }

    /// Host "end round": the clock reads zero immediately, settlement follows.
    pub fn force_expire(&mut self) -> AuctionResult<()> {
        self.require("end the round", &[Lifecycle::Running])?;
        self.timer.expire();
        Ok(())
    }

    /// Revealed -> RoundReady. Balances carry over untouched.
    pub fn next_round(&mut self) -> AuctionResult<()> {
        self.require("start the next round", &[Lifecycle::Revealed])?;
        self.round_number = self.round_number.saturating_add(1);
        self.current_bid = self.base_bid;
        self.clear_round_outcome();
        self.timer = TimerState::staged(self.timer.duration_sec);
        self.lifecycle = Lifecycle::RoundReady;
        Ok(())
    }

    /// Invariants every committed room satisfies.
    pub fn is_consistent(&self) -> bool {
        let price_floor = self.current_bid >= self.base_bid;
        let lock_matches = !self.current_price_has_bid
            || self.leading_bid.as_ref().map(|l| l.amount) == Some(self.current_bid);
        let winner_only_when_revealed =
            self.revealed_winner.is_none() || self.lifecycle == Lifecycle::Revealed;
        price_floor && lock_matches && winner_only_when_revealed
    }
}

/// Trim and upper-case a typed room code, rejecting anything outside the alphabet.
pub fn normalize_room_code(raw: &str) -> AuctionResult<String> {
    let code = raw.trim().to_uppercase();
    if code.chars().count() != ROOM_CODE_LEN || !code.chars().all(|c| ROOM_CODE_ALPHABET.contains(c)) {
        return Err(AuctionError::InvalidRoomCode);
    }
    Ok(code)
}

/// Fresh room code for a host; uniqueness is settled by `open_room` creating only if absent.
pub fn generate_room_code<R: Rng + ?Sized>(rng: &mut R) -> String {
    let chars: Vec<char> = ROOM_CODE_ALPHABET.chars().collect();
    (0..ROOM_CODE_LEN)
        .map(|_| chars[rng.gen_range(0..chars.len())])
        .collect()
}
