// End-to-end round scenarios driven through the pure room API, the same
// transitions the reducers apply inside one transaction each.

use auction_room::arbitration::arbitrate_bid;
use auction_room::client::{auto_reveal_due, RoomStatus, RoomView, RoundEffects};
use auction_room::errors::{AuctionError, BidError};
use auction_room::ledger::{settle_round, Settlement};
use auction_room::lifecycle::Lifecycle;
use auction_room::roster::{release_if_leader, upsert_member};
use auction_room::timer::Countdown;
use auction_room::{Player, Room};
use spacetimedb::{Identity, Timestamp};

const T0: i64 = 1_700_000_000_000;

fn id(seed: u8) -> Identity {
    Identity::from_byte_array([seed; 32])
}

fn host() -> Identity {
    id(0)
}

fn new_room() -> Room {
    Room::new("QRST23".to_string(), host(), Some("Friday Lot".into()), Timestamp::from_micros_since_unix_epoch(0))
}

fn join(room: &Room, seed: u8, name: &str) -> Player {
    let mut player = upsert_member(None, room, id(seed), name.to_string(), Timestamp::from_micros_since_unix_epoch(0));
    player.id = u64::from(seed);
    player
}

/// Settle with the leader's row looked up the way the reducer does
fn settle(room: &mut Room, roster: &mut [Player], now_ms: i64) -> Settlement {
    let leader = room.leading_bid.as_ref().map(|l| l.player);
    let row = roster.iter_mut().find(|p| Some(p.identity) == leader);
    settle_round(room, row, now_ms).unwrap()
}

#[test]
fn raise_lets_the_next_bidder_win() {
    let mut room = new_room();
    let mut roster = vec![join(&room, 1, "A"), join(&room, 2, "B")];
    room.set_base_price(20, T0).unwrap();
    room.set_increment(10).unwrap();
    room.start_round(T0).unwrap();

    arbitrate_bid(&mut room, Some(&roster[0]), Some(20), T0 + 1_000).unwrap();
    assert_eq!(
        arbitrate_bid(&mut room, Some(&roster[1]), Some(20), T0 + 1_001),
        Err(BidError::AlreadyClaimed { price: 20, leader_name: "A".into() })
    );

    assert_eq!(room.raise_price(T0 + 1_500).unwrap(), 30);
    assert!(!room.current_price_has_bid);
    assert!(room.leading_bid.is_none());

    // A stale client still showing $20
    assert_eq!(
        arbitrate_bid(&mut room, Some(&roster[0]), Some(20), T0 + 2_000),
        Err(BidError::PriceChanged { expected: 20, current: 30 })
    );
    arbitrate_bid(&mut room, Some(&roster[1]), Some(30), T0 + 2_001).unwrap();

    let settled = settle(&mut room, &mut roster, T0 + 60_000);
    assert_eq!(
        settled,
        Settlement::Winner { player: id(2), name: "B".into(), amount: 30, balance_after: Some(370) }
    );
    assert_eq!(roster[0].balance, 400);
    assert_eq!(roster[1].balance, 370);
    assert!(room.is_consistent());
}

#[test]
fn late_price_change_cannot_erase_the_winner() {
    let mut room = new_room();
    let mut roster = vec![join(&room, 1, "A")];
    room.start_round(T0).unwrap();
    arbitrate_bid(&mut room, Some(&roster[0]), Some(20), T0 + 100).unwrap();
    let deadline = room.timer.end_at_ms;

    // Host commands that land after time-up, before any settlement trigger
    assert_eq!(room.raise_price(deadline), Err(AuctionError::TimerExpired));
    assert_eq!(room.set_base_price(5, deadline + 200), Err(AuctionError::TimerExpired));

    assert_eq!(
        settle(&mut room, &mut roster, deadline + 500),
        Settlement::Winner { player: id(1), name: "A".into(), amount: 20, balance_after: Some(380) }
    );
}

#[test]
fn bid_above_balance_is_refused() {
    let mut room = new_room();
    room.set_base_price(20, T0).unwrap();
    room.start_round(T0).unwrap();
    let mut poor = join(&room, 1, "A");
    poor.balance = 15;

    assert_eq!(
        arbitrate_bid(&mut room, Some(&poor), None, T0 + 10),
        Err(BidError::InsufficientFunds { required: 20, balance: 15 })
    );
    assert!(!room.current_price_has_bid);
    assert!(room.leading_bid.is_none());
}

#[test]
fn pause_freezes_the_clock_for_every_reader() {
    let mut room = new_room();
    room.start_round(T0).unwrap();

    assert!(room.pause_timer(T0 + 23_000).unwrap());
    let mut countdown = Countdown::new();
    countdown.observe(Some(&room));
    for later in [T0 + 23_000, T0 + 90_000, T0 + 3_600_000] {
        assert_eq!(room.remaining_secs(later), 37);
        assert_eq!(countdown.remaining(later), Some(37));
    }

    let resumed_at = T0 + 500_000;
    assert!(room.resume_timer(resumed_at).unwrap());
    assert_eq!(room.timer.end_at_ms, resumed_at + 37_000);
    assert_eq!(room.remaining_secs(resumed_at + 36_001), 1);
    assert_eq!(room.remaining_secs(resumed_at + 37_000), 0);
}

#[test]
fn every_trigger_settles_only_once() {
    let mut room = new_room();
    let mut roster = vec![join(&room, 1, "A")];
    room.start_round(T0).unwrap();
    arbitrate_bid(&mut room, Some(&roster[0]), None, T0).unwrap();
    let deadline = room.timer.end_at_ms;

    // Two clients hit zero, the scheduler fires, and the host presses end
    let outcomes: Vec<_> = (0..4).map(|i| settle(&mut room, &mut roster, deadline + i)).collect();
    assert!(matches!(outcomes[0], Settlement::Winner { amount: 20, .. }));
    assert!(outcomes[1..].iter().all(|s| *s == Settlement::AlreadySettled));
    assert_eq!(roster[0].balance, 380);
}

#[test]
fn funds_only_move_at_settlement() {
    let mut room = new_room();
    let mut roster = vec![join(&room, 1, "A"), join(&room, 2, "B"), join(&room, 3, "C")];
    let total = |r: &[Player]| r.iter().map(|p| p.balance).sum::<u64>();
    let start_total = total(&roster);

    // (bidder index per raise, expected winning price)
    let rounds: [(&[usize], u64); 3] = [(&[0, 1, 0], 40), (&[2], 20), (&[], 0)];
    let mut spent = 0;
    let mut now = T0;

    for (bidders, price) in rounds {
        room.start_round(now).unwrap();
        for (i, &who) in bidders.iter().enumerate() {
            if i > 0 {
                room.raise_price(now).unwrap();
            }
            now += 1;
            arbitrate_bid(&mut room, Some(&roster[who]), None, now).unwrap();
            assert_eq!(total(&roster), start_total - spent, "a lock-in never moves funds");
        }
        now = room.timer.end_at_ms;
        match settle(&mut room, &mut roster, now) {
            Settlement::Winner { amount, .. } => {
                assert_eq!(amount, price);
                spent += amount;
            }
            Settlement::NoWinner => assert_eq!(price, 0),
            Settlement::AlreadySettled => panic!("fresh round reported settled"),
        }
        assert_eq!(total(&roster), start_total - spent);
        room.next_round().unwrap();
    }

    assert_eq!(room.round_number, 4);
    assert_eq!(room.lifecycle, Lifecycle::RoundReady);
}

#[test]
fn removed_leader_cannot_win() {
    let mut room = new_room();
    let mut roster = vec![join(&room, 1, "A")];
    room.start_round(T0).unwrap();
    arbitrate_bid(&mut room, Some(&roster[0]), None, T0).unwrap();

    assert!(release_if_leader(&mut room, id(1)));
    let gone = roster.remove(0);
    let deadline = room.timer.end_at_ms;
    assert_eq!(settle(&mut room, &mut roster, deadline), Settlement::NoWinner);
    assert_eq!(gone.balance, 400);
}

#[test]
fn clients_agree_on_status_and_reveal_once() {
    let mut room = new_room();
    let mut roster = vec![join(&room, 1, "A")];
    room.start_round(T0).unwrap();
    arbitrate_bid(&mut room, Some(&roster[0]), None, T0 + 5).unwrap();
    let deadline = room.timer.end_at_ms;

    let mut clocks = [Countdown::new(), Countdown::new()];
    let mut effects = [RoundEffects::new(), RoundEffects::new()];
    for clock in clocks.iter_mut() {
        clock.observe(Some(&room));
    }

    // Both clients notice time-up; each tries once, the store accepts the first
    let mut settlements = Vec::new();
    for (clock, fx) in clocks.iter().zip(effects.iter_mut()) {
        if auto_reveal_due(&room, clock, deadline, fx) {
            settlements.push(settle(&mut room, &mut roster, deadline));
        }
        assert!(!auto_reveal_due(&room, clock, deadline + 250, fx));
    }
    assert_eq!(settlements.len(), 1);

    for clock in clocks.iter_mut() {
        clock.observe(Some(&room));
        let view = RoomView::new(&room, id(2), false);
        assert_eq!(view.status(clock, deadline), RoomStatus::Won { name: "A".into(), amount: 20 });
    }
}
