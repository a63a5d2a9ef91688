use spacetimedb::{
    reducer, table, view, Identity, ReducerContext, ScheduleAt, Table, Timestamp,
};

pub mod arbitration;
pub mod client;
pub mod errors;
pub mod ledger;
pub mod lifecycle;
pub mod roster;
pub mod timer;

// Roster restore reducers for disaster recovery
mod restore;

use arbitration::arbitrate_bid;
use errors::{AuctionError, BidError};
use ledger::{Settlement, TimeoutAction};
use lifecycle::{normalize_room_code, LeadingBid, Lifecycle, RevealedWinner};
use timer::TimerState;

// ==================== CONSTANTS ====================

/// Room codes are short enough to read aloud
pub const ROOM_CODE_LEN: usize = 6;

/// Avoid confusing glyphs (no I, O, 0, 1)
pub const ROOM_CODE_ALPHABET: &str = "ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

pub const DEFAULT_TITLE: &str = "Auction Game";
pub const DEFAULT_THEME: &str = "classic";
pub const DEFAULT_BASE_BID: u64 = 20;
pub const DEFAULT_INCREMENT: u64 = 10;
pub const DEFAULT_STARTING_FUNDS: u64 = 400;
pub const DEFAULT_DURATION_SECS: u32 = 60;

pub const MAX_NAME_LEN: usize = 32;

/// Shown as the winner of a round that closed without a bid
pub const NO_WINNER_NAME: &str = "No winner";

// ==================== TABLES ====================

/// One auction session. Everything a client renders derives from this row.
#[table(name = room, public)]
#[derive(Clone, Debug)]
pub struct Room {
    #[primary_key]
    pub code: String,

    /// Identity that created the room; only it may issue host commands
    pub host: Identity,

    /// Cosmetic
    pub title: String,
    pub theme: String,

    /// Starts at 1, bumped by next_round
    pub round_number: u32,

    pub lifecycle: Lifecycle,

    /// Floor price for each round
    pub base_bid: u64,

    /// The exact price every bid must match
    pub current_bid: u64,

    /// Added to current_bid on each raise
    pub increment: u64,

    /// Lock bit: someone has claimed current_bid
    pub current_price_has_bid: bool,

    pub leading_bid: Option<LeadingBid>,

    /// Set once per round by settlement
    pub revealed_winner: Option<RevealedWinner>,

    /// Balance for new joiners and bulk refills
    pub starting_funds: u64,

    pub timer: TimerState,

    pub created_at: Timestamp,
}

/// A participant in one room. The same identity in another room is another row.
#[table(name = player, public)]
#[derive(Clone, Debug)]
pub struct Player {
    #[primary_key]
    #[auto_inc]
    pub id: u64,

    #[index(btree)]
    pub room_code: String,

    /// Stable per-device identity (client SDK persists its token)
    #[index(btree)]
    pub identity: Identity,

    pub name: String,

    /// Moves only at settlement or by host adjustment
    pub balance: u64,

    pub joined_at: Timestamp,
}

/// Append-only audit log of successful lock-ins. Never read for arbitration.
#[table(name = bid, public)]
pub struct Bid {
    #[primary_key]
    #[auto_inc]
    pub id: u64,

    #[index(btree)]
    pub room_code: String,

    pub player: Identity,
    pub name: String,
    pub amount: u64,
    pub round_number: u32,
    pub placed_at: Timestamp,
}

/// Fires settlement at the running round's deadline.
/// Cancelled on pause and end, re-inserted on resume.
#[table(name = round_timeout_schedule, scheduled(round_timeout))]
pub struct RoundTimeoutSchedule {
    #[primary_key]
    #[auto_inc]
    pub id: u64,

    #[index(btree)]
    pub room_code: String,

    pub scheduled_at: ScheduleAt,
}

// ==================== VIEWS ====================

/// The caller's own player rows, one per joined room
#[view(name = my_player, public)]
fn my_player(ctx: &spacetimedb::ViewContext) -> Vec<Player> {
    ctx.db.player().identity().filter(&ctx.sender).collect()
}

// ==================== HELPERS ====================

fn now_ms(ctx: &ReducerContext) -> i64 {
    ctx.timestamp.to_micros_since_unix_epoch() / 1000
}

fn short_id(identity: &Identity) -> String {
    let hex = identity.to_hex().to_string();
    hex[..8.min(hex.len())].to_string()
}

/// Log a rejected command and turn it into the reducer's error string
fn rejected(action: &str, sender: &Identity, err: impl std::fmt::Display) -> String {
    log::warn!("[ROOM] {} rejected for {}: {}", action, short_id(sender), err);
    err.to_string()
}

fn load_room(ctx: &ReducerContext, code: &str) -> Result<Room, AuctionError> {
    let code = normalize_room_code(code)?;
    ctx.db.room().code().find(&code).ok_or(AuctionError::NoRoom)
}

/// Load a room the caller hosts
fn hosted_room(ctx: &ReducerContext, code: &str) -> Result<Room, AuctionError> {
    let room = load_room(ctx, code)?;
    if !room.is_host(ctx.sender) {
        return Err(AuctionError::NotHost);
    }
    Ok(room)
}

fn find_player(ctx: &ReducerContext, room_code: &String, identity: Identity) -> Option<Player> {
    ctx.db.player()
        .room_code()
        .filter(room_code)
        .find(|p| p.identity == identity)
}

fn room_player(ctx: &ReducerContext, room_code: &String, player_id: u64) -> Result<Player, AuctionError> {
    ctx.db.player()
        .id()
        .find(&player_id)
        .filter(|p| &p.room_code == room_code)
        .ok_or(AuctionError::PlayerNotFound)
}

/// Cancel round timeout (idempotent)
fn cancel_round_timeout(ctx: &ReducerContext, room_code: &String) {
    let pending: Vec<_> = ctx.db.round_timeout_schedule()
        .room_code()
        .filter(room_code)
        .map(|s| s.id)
        .collect();
    for id in pending {
        ctx.db.round_timeout_schedule().id().delete(&id);
    }
}

/// Replace any pending timeout with one at the timer's current deadline
fn schedule_round_timeout(ctx: &ReducerContext, room: &Room) {
    cancel_round_timeout(ctx, &room.code);
    let Some(end_at_ms) = ledger::timeout_deadline(room) else {
        return;
    };
    let deadline = Timestamp::from_micros_since_unix_epoch(end_at_ms.saturating_mul(1000));
    ctx.db.round_timeout_schedule().insert(RoundTimeoutSchedule {
        id: 0,
        room_code: room.code.clone(),
        scheduled_at: ScheduleAt::Time(deadline.into()),
    });
}

/// Run settlement against the room and the leader's row in this transaction.
/// Safe to call from any trigger; only the first call per round writes.
fn settle(ctx: &ReducerContext, mut room: Room, trigger: &str) -> Result<Settlement, AuctionError> {
    let mut leader_row = room.leading_bid
        .as_ref()
        .and_then(|lead| find_player(ctx, &room.code, lead.player));

    let settlement = ledger::settle_round(&mut room, leader_row.as_mut(), now_ms(ctx))?;
    match &settlement {
        Settlement::AlreadySettled => {
            log::debug!("[SETTLE] room:{} round:{} already settled ({})", room.code, room.round_number, trigger);
            return Ok(settlement);
        }
        Settlement::NoWinner => {
            log::info!("[SETTLE] room:{} round:{} no winner via:{}", room.code, room.round_number, trigger);
        }
        Settlement::Winner { player, name, amount, balance_after } => {
            match balance_after {
                Some(balance) => log::info!(
                    "[SETTLE] room:{} round:{} winner:{} ({}) amount:{} balance:{} via:{}",
                    room.code, room.round_number, name, short_id(player), amount, balance, trigger
                ),
                None => log::warn!(
                    "[SETTLE] room:{} round:{} winner:{} has no player row, nothing debited",
                    room.code, room.round_number, name
                ),
            }
        }
    }

    if let Some(row) = leader_row {
        ctx.db.player().id().update(row);
    }
    cancel_round_timeout(ctx, &room.code);
    ctx.db.room().code().update(room);
    Ok(settlement)
}

// ==================== ROOM REDUCERS ====================

/// Create a room with a client-generated code. If the code is taken this is a
/// no-op, so a reconnecting host never resets a game in progress.
#[reducer]
pub fn open_room(ctx: &ReducerContext, code: String, title: Option<String>) -> Result<(), String> {
    let code = normalize_room_code(&code).map_err(|e| rejected("open_room", &ctx.sender, e))?;

    if let Some(existing) = ctx.db.room().code().find(&code) {
        log::debug!("[ROOM] open {} ignored, exists (host:{})", code, short_id(&existing.host));
        return Ok(());
    }

    let room = Room::new(code.clone(), ctx.sender, title, ctx.timestamp);
    ctx.db.room().insert(room);
    log::info!("[ROOM] created code:{} host:{}", code, short_id(&ctx.sender));
    Ok(())
}

/// Cosmetic fields only; no concurrent-writer risk
#[reducer]
pub fn update_room_meta(
    ctx: &ReducerContext,
    code: String,
    title: Option<String>,
    theme: Option<String>,
) -> Result<(), String> {
    let mut room = hosted_room(ctx, &code).map_err(|e| rejected("update_room_meta", &ctx.sender, e))?;
    if let Some(title) = title.map(|t| t.trim().to_string()).filter(|t| !t.is_empty()) {
        room.title = title;
    }
    if let Some(theme) = theme.map(|t| t.trim().to_string()).filter(|t| !t.is_empty()) {
        room.theme = theme;
    }
    ctx.db.room().code().update(room);
    Ok(())
}

#[reducer]
pub fn set_increment(ctx: &ReducerContext, code: String, increment: u64) -> Result<(), String> {
    let mut room = hosted_room(ctx, &code).map_err(|e| rejected("set_increment", &ctx.sender, e))?;
    room.set_increment(increment).map_err(|e| rejected("set_increment", &ctx.sender, e))?;
    log::info!("[ROOM] increment room:{} increment:{}", room.code, increment);
    ctx.db.room().code().update(room);
    Ok(())
}

#[reducer]
pub fn set_base_price(ctx: &ReducerContext, code: String, price: u64) -> Result<(), String> {
    let mut room = hosted_room(ctx, &code).map_err(|e| rejected("set_base_price", &ctx.sender, e))?;
    room.set_base_price(price, now_ms(ctx)).map_err(|e| rejected("set_base_price", &ctx.sender, e))?;
    log::info!("[ROUND] base price room:{} round:{} price:{}", room.code, room.round_number, price);
    ctx.db.room().code().update(room);
    Ok(())
}

#[reducer]
pub fn reset_to_base(ctx: &ReducerContext, code: String) -> Result<(), String> {
    let mut room = hosted_room(ctx, &code).map_err(|e| rejected("reset_to_base", &ctx.sender, e))?;
    room.reset_to_base(now_ms(ctx)).map_err(|e| rejected("reset_to_base", &ctx.sender, e))?;
    log::info!("[ROUND] price reset room:{} round:{} price:{}", room.code, room.round_number, room.current_bid);
    ctx.db.room().code().update(room);
    Ok(())
}

#[reducer]
pub fn set_timer_duration(ctx: &ReducerContext, code: String, duration_secs: u32) -> Result<(), String> {
    let mut room = hosted_room(ctx, &code).map_err(|e| rejected("set_timer_duration", &ctx.sender, e))?;
    room.set_timer_duration(duration_secs)
        .map_err(|e| rejected("set_timer_duration", &ctx.sender, e))?;
    ctx.db.room().code().update(room);
    Ok(())
}

// ==================== ROUND REDUCERS ====================

#[reducer]
pub fn prepare_round(ctx: &ReducerContext, code: String, duration_secs: Option<u32>) -> Result<(), String> {
    let mut room = hosted_room(ctx, &code).map_err(|e| rejected("prepare_round", &ctx.sender, e))?;
    room.prepare_round(duration_secs).map_err(|e| rejected("prepare_round", &ctx.sender, e))?;
    log::info!("[ROUND] ready room:{} round:{} price:{} secs:{}",
        room.code, room.round_number, room.current_bid, room.timer.duration_sec);
    ctx.db.room().code().update(room);
    Ok(())
}

#[reducer]
pub fn start_round(ctx: &ReducerContext, code: String) -> Result<(), String> {
    let mut room = hosted_room(ctx, &code).map_err(|e| rejected("start_round", &ctx.sender, e))?;
    room.start_round(now_ms(ctx)).map_err(|e| rejected("start_round", &ctx.sender, e))?;
    schedule_round_timeout(ctx, &room);
    log::info!("[ROUND] started room:{} round:{} price:{} ends_at_ms:{}",
        room.code, room.round_number, room.current_bid, room.timer.end_at_ms);
    ctx.db.room().code().update(room);
    Ok(())
}

#[reducer]
pub fn raise_price(ctx: &ReducerContext, code: String) -> Result<(), String> {
    let mut room = hosted_room(ctx, &code).map_err(|e| rejected("raise_price", &ctx.sender, e))?;
    let price = room.raise_price(now_ms(ctx)).map_err(|e| rejected("raise_price", &ctx.sender, e))?;
    log::info!("[ROUND] raised room:{} round:{} price:{}", room.code, room.round_number, price);
    ctx.db.room().code().update(room);
    Ok(())
}

#[reducer]
pub fn pause_timer(ctx: &ReducerContext, code: String) -> Result<(), String> {
    let mut room = hosted_room(ctx, &code).map_err(|e| rejected("pause_timer", &ctx.sender, e))?;
    if !room.pause_timer(now_ms(ctx)).map_err(|e| rejected("pause_timer", &ctx.sender, e))? {
        log::debug!("[ROUND] pause ignored, room:{} already paused", room.code);
        return Ok(());
    }
    cancel_round_timeout(ctx, &room.code);
    log::info!("[ROUND] paused room:{} remaining:{}s", room.code, room.timer.paused_remaining_sec);
    ctx.db.room().code().update(room);
    Ok(())
}

#[reducer]
pub fn resume_timer(ctx: &ReducerContext, code: String) -> Result<(), String> {
    let mut room = hosted_room(ctx, &code).map_err(|e| rejected("resume_timer", &ctx.sender, e))?;
    if !room.resume_timer(now_ms(ctx)).map_err(|e| rejected("resume_timer", &ctx.sender, e))? {
        log::debug!("[ROUND] resume ignored, room:{} not paused", room.code);
        return Ok(());
    }
    schedule_round_timeout(ctx, &room);
    log::info!("[ROUND] resumed room:{} ends_at_ms:{}", room.code, room.timer.end_at_ms);
    ctx.db.room().code().update(room);
    Ok(())
}

/// Host ends the round early: force-expire, then the same settlement as time-up
#[reducer]
pub fn end_round(ctx: &ReducerContext, code: String) -> Result<(), String> {
    let mut room = hosted_room(ctx, &code).map_err(|e| rejected("end_round", &ctx.sender, e))?;
    if room.revealed_winner.is_some() {
        log::debug!("[ROUND] end ignored, room:{} round:{} already revealed", room.code, room.round_number);
        return Ok(());
    }
    room.force_expire().map_err(|e| rejected("end_round", &ctx.sender, e))?;
    settle(ctx, room, "host").map_err(|e| rejected("end_round", &ctx.sender, e))?;
    Ok(())
}

/// Time-up fallback any participant may call once its clock reads zero.
/// Concurrent callers are harmless: only the first settles.
#[reducer]
pub fn reveal_winner(ctx: &ReducerContext, code: String) -> Result<(), String> {
    let room = load_room(ctx, &code).map_err(|e| rejected("reveal_winner", &ctx.sender, e))?;
    ledger::ensure_time_up(&room, now_ms(ctx)).map_err(|e| rejected("reveal_winner", &ctx.sender, e))?;
    settle(ctx, room, "client").map_err(|e| rejected("reveal_winner", &ctx.sender, e))?;
    Ok(())
}

/// Scheduled settlement at the round deadline
#[reducer]
pub fn round_timeout(ctx: &ReducerContext, schedule: RoundTimeoutSchedule) {
    // Only allow scheduler to call this, not clients
    if ctx.sender != ctx.identity() {
        log::warn!("Client {} attempted to call round_timeout", ctx.sender);
        return;
    }

    // Clean up schedule row before handling (a reschedule below inserts a fresh one)
    ctx.db.round_timeout_schedule().id().delete(&schedule.id);

    let Some(room) = ctx.db.room().code().find(&schedule.room_code) else {
        log::debug!("[SETTLE] timeout fired for missing room {}", schedule.room_code);
        return;
    };

    match ledger::timeout_action(&room, now_ms(ctx)) {
        TimeoutAction::Skip => {}
        TimeoutAction::Reschedule { end_at_ms } => {
            log::debug!("[SETTLE] timeout early for {}, rearming at {}", room.code, end_at_ms);
            schedule_round_timeout(ctx, &room);
        }
        TimeoutAction::Settle => {
            if let Err(e) = settle(ctx, room, "timer") {
                log::warn!("[SETTLE] timeout for {} failed: {}", schedule.room_code, e);
            }
        }
    }
}

#[reducer]
pub fn next_round(ctx: &ReducerContext, code: String) -> Result<(), String> {
    let mut room = hosted_room(ctx, &code).map_err(|e| rejected("next_round", &ctx.sender, e))?;
    room.next_round().map_err(|e| rejected("next_round", &ctx.sender, e))?;
    log::info!("[ROUND] next room:{} round:{} price:{}", room.code, room.round_number, room.current_bid);
    ctx.db.room().code().update(room);
    Ok(())
}

/// Delete the room and everything under it. The host's client opens a fresh code afterwards.
#[reducer]
pub fn end_game(ctx: &ReducerContext, code: String) -> Result<(), String> {
    let room = hosted_room(ctx, &code).map_err(|e| rejected("end_game", &ctx.sender, e))?;

    cancel_round_timeout(ctx, &room.code);

    let bids: Vec<_> = ctx.db.bid().room_code().filter(&room.code).map(|b| b.id).collect();
    for id in &bids {
        ctx.db.bid().id().delete(id);
    }

    let players: Vec<_> = ctx.db.player().room_code().filter(&room.code).map(|p| p.id).collect();
    for id in &players {
        ctx.db.player().id().delete(id);
    }

    ctx.db.room().code().delete(&room.code);
    log::info!("[ROOM] ended code:{} rounds:{} players:{} bids:{}",
        room.code, room.round_number, players.len(), bids.len());
    Ok(())
}

// ==================== BIDDING ====================

/// First valid bid at the current price wins it; everyone else is told why not.
/// `expected_price` is the price the bidder saw, if the client sends it.
#[reducer]
pub fn attempt_bid(ctx: &ReducerContext, code: String, expected_price: Option<u64>) -> Result<(), String> {
    let code = normalize_room_code(&code).map_err(|_| BidError::NoRoom.to_string())?;
    let mut room = ctx.db.room().code().find(&code).ok_or_else(|| BidError::NoRoom.to_string())?;
    let bidder = find_player(ctx, &code, ctx.sender);

    let receipt = match arbitrate_bid(&mut room, bidder.as_ref(), expected_price, now_ms(ctx)) {
        Ok(receipt) => receipt,
        Err(e) => {
            log::info!("[BID] rejected room:{} round:{} bidder:{} price:{}: {}",
                code, room.round_number, short_id(&ctx.sender), room.current_bid, e);
            return Err(e.to_string());
        }
    };

    let round_number = room.round_number;
    ctx.db.room().code().update(room);

    ctx.db.bid().insert(Bid {
        id: 0,
        room_code: code.clone(),
        player: ctx.sender,
        name: receipt.name.clone(),
        amount: receipt.amount,
        round_number,
        placed_at: ctx.timestamp,
    });

    log::info!("[BID] locked room:{} round:{} bidder:{} ({}) amount:{}",
        code, round_number, receipt.name, short_id(&ctx.sender), receipt.amount);
    Ok(())
}

// ==================== ROSTER & FUNDS ====================

/// Join, or rejoin under a new name; an existing balance is never reset
#[reducer]
pub fn join_room(ctx: &ReducerContext, code: String, name: String) -> Result<(), String> {
    let room = load_room(ctx, &code).map_err(|e| rejected("join_room", &ctx.sender, e))?;
    let name = roster::validate_name(&name).map_err(|e| rejected("join_room", &ctx.sender, e))?;

    let existing = find_player(ctx, &room.code, ctx.sender);
    let rejoin = existing.is_some();
    let player = roster::upsert_member(existing, &room, ctx.sender, name, ctx.timestamp);

    if rejoin {
        log::info!("[ROSTER] rejoined room:{} player:{} balance:{}", room.code, player.name, player.balance);
        ctx.db.player().id().update(player);
    } else {
        log::info!("[ROSTER] joined room:{} player:{} balance:{}", room.code, player.name, player.balance);
        ctx.db.player().insert(player);
    }
    Ok(())
}

#[reducer]
pub fn adjust_balance(ctx: &ReducerContext, code: String, player_id: u64, delta: i64) -> Result<(), String> {
    let room = hosted_room(ctx, &code).map_err(|e| rejected("adjust_balance", &ctx.sender, e))?;
    let mut player = room_player(ctx, &room.code, player_id)
        .map_err(|e| rejected("adjust_balance", &ctx.sender, e))?;

    let before = player.balance;
    player.balance = ledger::adjust_balance(before, delta);
    log::info!("[FUNDS] adjust room:{} player:{} delta:{} balance:{} -> {}",
        room.code, player.name, delta, before, player.balance);
    ctx.db.player().id().update(player);
    Ok(())
}

/// Room default for future joiners only
#[reducer]
pub fn set_starting_funds(ctx: &ReducerContext, code: String, amount: u64) -> Result<(), String> {
    let mut room = hosted_room(ctx, &code).map_err(|e| rejected("set_starting_funds", &ctx.sender, e))?;
    room.starting_funds = amount;
    ctx.db.room().code().update(room);
    Ok(())
}

/// Refill every current player to `amount` (between games)
#[reducer]
pub fn apply_starting_funds(ctx: &ReducerContext, code: String, amount: u64) -> Result<(), String> {
    let mut room = hosted_room(ctx, &code).map_err(|e| rejected("apply_starting_funds", &ctx.sender, e))?;
    let mut players: Vec<Player> = ctx.db.player().room_code().filter(&room.code).collect();

    ledger::apply_starting_funds(&mut room, &mut players, amount);
    log::info!("[FUNDS] refill room:{} players:{} amount:{}", room.code, players.len(), amount);

    for player in players {
        ctx.db.player().id().update(player);
    }
    ctx.db.room().code().update(room);
    Ok(())
}

/// Remove a player. If they held the lock it is released so they can't win the round.
#[reducer]
pub fn remove_player(ctx: &ReducerContext, code: String, player_id: u64) -> Result<(), String> {
    let mut room = hosted_room(ctx, &code).map_err(|e| rejected("remove_player", &ctx.sender, e))?;
    let player = room_player(ctx, &room.code, player_id)
        .map_err(|e| rejected("remove_player", &ctx.sender, e))?;

    ctx.db.player().id().delete(&player.id);

    if roster::release_if_leader(&mut room, player.identity) {
        log::info!("[ROSTER] removed leader room:{} player:{}, lock released at {}",
            room.code, player.name, room.current_bid);
        ctx.db.room().code().update(room);
    } else {
        log::info!("[ROSTER] removed room:{} player:{}", room.code, player.name);
    }
    Ok(())
}

// ==================== LIFECYCLE ====================

#[reducer(init)]
pub fn init(_ctx: &ReducerContext) {
    log::info!("Auction room module initialized");
}
