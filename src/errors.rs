use thiserror::Error;

use crate::lifecycle::Lifecycle;

/// Rejections from the bid arbitration transaction.
/// None of these leave a partial write behind: the reducer rolls back on `Err`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BidError {
    #[error("room not found, refresh and try again")]
    NoRoom,
    #[error("join the room before bidding")]
    NotJoined,
    #[error("bidding is closed for this round")]
    RoundClosed,
    #[error("price moved from ${expected} to ${current}, bid again at the new price")]
    PriceChanged { expected: u64, current: u64 },
    #[error("not enough funds for ${required}, balance is ${balance}")]
    InsufficientFunds { required: u64, balance: u64 },
    #[error("{leader_name} already locked in ${price}, wait for the next raise to bid again")]
    AlreadyClaimed { price: u64, leader_name: String },
    #[error("bid failed, try again ({0})")]
    TransientFailure(String),
}

/// Rejections from host commands and roster operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuctionError {
    #[error("room not found")]
    NoRoom,
    #[error("only the host can do that")]
    NotHost,
    #[error("room codes are {len} characters from {alphabet}", len = crate::ROOM_CODE_LEN, alphabet = crate::ROOM_CODE_ALPHABET)]
    InvalidRoomCode,
    #[error("names must be 1-{max} characters", max = crate::MAX_NAME_LEN)]
    InvalidName,
    #[error("increment must be greater than zero")]
    InvalidIncrement,
    #[error("cannot {action} while the room is {from:?}")]
    InvalidTransition { action: &'static str, from: Lifecycle },
    #[error("timer has already run out")]
    TimerExpired,
    #[error("round still has {secs}s remaining")]
    TimeRemaining { secs: u32 },
    #[error("player not found in this room")]
    PlayerNotFound,
    #[error("restore failed: {0}")]
    Restore(String),
}

pub type AuctionResult<T> = Result<T, AuctionError>;
pub type BidResult<T> = Result<T, BidError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejections_carry_both_numbers() {
        let err = BidError::InsufficientFunds { required: 20, balance: 15 };
        assert_eq!(err.to_string(), "not enough funds for $20, balance is $15");

        let err = BidError::AlreadyClaimed { price: 20, leader_name: "A".to_string() };
        assert!(err.to_string().starts_with("A already locked in $20"));
    }

    #[test]
    fn transition_error_names_the_state() {
        let err = AuctionError::InvalidTransition { action: "raise the price", from: Lifecycle::Revealed };
        assert_eq!(err.to_string(), "cannot raise the price while the room is Revealed");
    }
}
