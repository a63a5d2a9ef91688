//! Bid arbitration.
//!
//! `current_price_has_bid` is the single bit of mutual exclusion per price
//! level. `arbitrate_bid` reads it, checks funds, and sets it in the same
//! transaction, so of any number of concurrent attempts at one price exactly
//! one commits the lock and the rest observe it and fail without writing.

use crate::errors::{BidError, BidResult};
use crate::lifecycle::LeadingBid;
use crate::{Player, Room};

/// What a successful lock-in reports back to the bidder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BidReceipt {
    pub name: String,
    pub amount: u64,
    pub submitted_at_ms: i64,
}

/// Fast local reject run by clients before calling the reducer. Not authoritative.
pub fn precheck_bid(room: &Room, now_ms: i64) -> BidResult<()> {
    if room.is_bidding_open(now_ms) {
        Ok(())
    } else {
        Err(BidError::RoundClosed)
    }
}

/// Try to lock in `bidder` at the room's current price.
///
/// Must run inside one transaction together with the reads of `room` and
/// `bidder`. On `Err` nothing in `room` has been touched.
pub fn arbitrate_bid(
    room: &mut Room,
    bidder: Option<&Player>,
    expected_price: Option<u64>,
    now_ms: i64,
) -> BidResult<BidReceipt> {
    // The round may have closed between the client's precheck and this commit
    if !room.is_bidding_open(now_ms) {
        return Err(BidError::RoundClosed);
    }

    let price = room.current_bid;
    if let Some(expected) = expected_price {
        if expected != price {
            return Err(BidError::PriceChanged { expected, current: price });
        }
    }

    let bidder = bidder.ok_or(BidError::NotJoined)?;
    if bidder.balance < price {
        return Err(BidError::InsufficientFunds { required: price, balance: bidder.balance });
    }

    if let Some(lead) = room.leader_at_current_price() {
        return Err(BidError::AlreadyClaimed { price, leader_name: lead.name.clone() });
    }

    let previous_ms = room.leading_bid.as_ref().map(|l| l.submitted_at_ms).unwrap_or(i64::MIN);
    let submitted_at_ms = now_ms.max(previous_ms.saturating_add(1));

    room.current_price_has_bid = true;
    room.leading_bid = Some(LeadingBid {
        player: bidder.identity,
        name: bidder.name.clone(),
        amount: price,
        submitted_at_ms,
    });
    room.revealed_winner = None;

    Ok(BidReceipt { name: bidder.name.clone(), amount: price, submitted_at_ms })
}
