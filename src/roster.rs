//! Roster membership and identity.

use spacetimedb::{Identity, Timestamp};

use crate::errors::{AuctionError, AuctionResult};
use crate::{Player, Room, MAX_NAME_LEN};

pub fn validate_name(raw: &str) -> AuctionResult<String> {
    let name = raw.trim();
    if name.is_empty() || name.chars().count() > MAX_NAME_LEN {
        return Err(AuctionError::InvalidName);
    }
    Ok(name.to_string())
}

/// Join or rejoin. A rejoin only renames: balance and join time survive,
/// so a refresh mid-game never resets funds.
pub fn upsert_member(
    existing: Option<Player>,
    room: &Room,
    identity: Identity,
    name: String,
    now: Timestamp,
) -> Player {
    match existing {
        Some(mut player) => {
            player.name = name;
            player
        }
        None => Player {
            id: 0,
            room_code: room.code.clone(),
            identity,
            name,
            balance: room.starting_funds,
            joined_at: now,
        },
    }
}

/// Drop the lock if `removed` held it, so a removed player can't win the round.
pub fn release_if_leader(room: &mut Room, removed: Identity) -> bool {
    let held = room.leading_bid.as_ref().is_some_and(|lead| lead.player == removed);
    if held {
        room.clear_lock();
    }
    held
}

/// Display order: by name, then by join time so equal names stay put.
pub fn sorted_by_name(mut players: Vec<Player>) -> Vec<Player> {
    players.sort_by(|a, b| a.name.cmp(&b.name).then(a.joined_at.cmp(&b.joined_at)));
    players
}

/// A client is the game host if it created the room this session or its identity matches.
pub fn is_game_host(room: &Room, me: Identity, created_this_session: bool) -> bool {
    created_this_session || room.is_host(me)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arbitration::arbitrate_bid;

    const T0: i64 = 1_700_000_000_000;

    fn id(seed: u8) -> Identity {
        Identity::from_byte_array([seed; 32])
    }

    fn ts(micros: i64) -> Timestamp {
        Timestamp::from_micros_since_unix_epoch(micros)
    }

    fn room() -> Room {
        Room::new("ABCDEF".to_string(), id(0), None, ts(0))
    }

    #[test]
    fn names_are_trimmed_and_bounded() {
        assert_eq!(validate_name("  Ada ").unwrap(), "Ada");
        assert_eq!(validate_name("   "), Err(AuctionError::InvalidName));
        assert_eq!(validate_name(&"x".repeat(MAX_NAME_LEN + 1)), Err(AuctionError::InvalidName));
        assert!(validate_name(&"x".repeat(MAX_NAME_LEN)).is_ok());
    }

    #[test]
    fn new_member_gets_starting_funds() {
        let mut room = room();
        room.starting_funds = 250;
        let player = upsert_member(None, &room, id(1), "Ada".into(), ts(5));
        assert_eq!(player.balance, 250);
        assert_eq!(player.room_code, "ABCDEF");
        assert_eq!(player.joined_at, ts(5));
    }

    #[test]
    fn rejoin_preserves_balance_and_join_time() {
        let room = room();
        let mut first = upsert_member(None, &room, id(1), "Ada".into(), ts(5));
        first.balance = 37;

        let again = upsert_member(Some(first), &room, id(1), "Ada L".into(), ts(99));
        assert_eq!(again.balance, 37);
        assert_eq!(again.joined_at, ts(5));
        assert_eq!(again.name, "Ada L");
    }

    #[test]
    fn removing_the_leader_releases_the_lock() {
        let mut room = room();
        room.start_round(T0).unwrap();
        let ada = upsert_member(None, &room, id(1), "Ada".into(), ts(0));
        arbitrate_bid(&mut room, Some(&ada), None, T0).unwrap();

        assert!(!release_if_leader(&mut room, id(2)));
        assert!(room.current_price_has_bid);

        assert!(release_if_leader(&mut room, id(1)));
        assert!(!room.current_price_has_bid);
        assert!(room.leading_bid.is_none());
    }

    #[test]
    fn roster_sorts_by_name_then_join_time() {
        let room = room();
        let players = vec![
            upsert_member(None, &room, id(1), "Cy".into(), ts(1)),
            upsert_member(None, &room, id(2), "Al".into(), ts(3)),
            upsert_member(None, &room, id(3), "Al".into(), ts(2)),
        ];
        let sorted = sorted_by_name(players);
        let order: Vec<_> = sorted.iter().map(|p| p.identity).collect();
        assert_eq!(order, vec![id(3), id(2), id(1)]);
    }

    #[test]
    fn host_is_recognized_by_identity_or_session() {
        let room = room();
        assert!(is_game_host(&room, id(0), false));
        assert!(is_game_host(&room, id(7), true));
        assert!(!is_game_host(&room, id(7), false));
    }
}
