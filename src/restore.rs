// Roster restore for disaster recovery
// Accepts a JSON array exported from a room's player table

use spacetimedb::{reducer, Identity, ReducerContext, Table, Timestamp};
use crate::errors::AuctionError;
use crate::{find_player, hosted_room, player, roster, short_id, Player};
use serde_json::Value;

/// One exported player: `{"identity": "<hex>", "name": "...", "balance": 120, "joinedAt": "<RFC3339>"}`
#[derive(Debug, Clone, PartialEq)]
pub struct RosterEntry {
    pub identity: Identity,
    pub name: String,
    pub balance: u64,
    pub joined_at: Option<Timestamp>,
}

/// Parse an RFC3339 string like "2025-03-01T18:04:05Z" into a Timestamp
fn parse_joined_at(raw: &str) -> Result<Timestamp, String> {
    let parsed = chrono::DateTime::parse_from_rfc3339(raw)
        .map_err(|e| format!("Invalid joinedAt '{}': {}", raw, e))?;
    Ok(Timestamp::from_micros_since_unix_epoch(parsed.timestamp_micros()))
}

fn parse_entry(i: usize, val: &Value) -> Result<RosterEntry, String> {
    let hex = val.get("identity").and_then(|v| v.as_str())
        .ok_or(format!("Player {}: missing identity", i))?;
    let identity = Identity::from_hex(hex)
        .map_err(|e| format!("Player {}: invalid identity: {}", i, e))?;

    let raw_name = val.get("name").and_then(|v| v.as_str())
        .ok_or(format!("Player {}: missing name", i))?;
    let name = roster::validate_name(raw_name)
        .map_err(|e| format!("Player {}: {}", i, e))?;

    let balance = val.get("balance").and_then(|v| v.as_u64())
        .ok_or(format!("Player {}: missing balance", i))?;

    // Older exports have no join time
    let joined_at = match val.get("joinedAt").and_then(|v| v.as_str()) {
        Some(raw) => Some(parse_joined_at(raw).map_err(|e| format!("Player {}: {}", i, e))?),
        None => None,
    };

    Ok(RosterEntry { identity, name, balance, joined_at })
}

/// Parse a whole export. Fails on the first bad entry so nothing is half-applied.
pub fn parse_roster(json_data: &str) -> Result<Vec<RosterEntry>, AuctionError> {
    let data: Value = serde_json::from_str(json_data)
        .map_err(|e| AuctionError::Restore(format!("Invalid JSON: {}", e)))?;
    let entries = data.as_array()
        .ok_or_else(|| AuctionError::Restore("Expected JSON array of players".to_string()))?;

    entries.iter()
        .enumerate()
        .map(|(i, val)| parse_entry(i, val))
        .collect::<Result<Vec<_>, _>>()
        .map_err(AuctionError::Restore)
}

/// Restore a room's roster from a JSON export. Host only.
/// Existing rows are overwritten with the exported name and balance.
#[reducer]
pub fn restore_roster(ctx: &ReducerContext, code: String, json_data: String) -> Result<(), String> {
    let room = hosted_room(ctx, &code).map_err(|e| {
        log::warn!("[RESTORE] rejected for {}: {}", short_id(&ctx.sender), e);
        e.to_string()
    })?;
    let entries = parse_roster(&json_data).map_err(|e| e.to_string())?;

    let (mut inserted, mut updated) = (0, 0);
    for entry in entries {
        match find_player(ctx, &room.code, entry.identity) {
            Some(mut existing) => {
                existing.name = entry.name;
                existing.balance = entry.balance;
                if let Some(joined_at) = entry.joined_at {
                    existing.joined_at = joined_at;
                }
                ctx.db.player().id().update(existing);
                updated += 1;
            }
            None => {
                ctx.db.player().insert(Player {
                    id: 0,
                    room_code: room.code.clone(),
                    identity: entry.identity,
                    name: entry.name,
                    balance: entry.balance,
                    joined_at: entry.joined_at.unwrap_or(ctx.timestamp),
                });
                inserted += 1;
            }
        }
    }

    log::info!("[RESTORE] room:{} inserted:{} updated:{}", room.code, inserted, updated);
    Ok(())
}
