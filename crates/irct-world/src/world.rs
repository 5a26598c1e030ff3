//! World-module sync helpers
//!
//! Each helper acts through one explicitly chosen handle and checks the
//! broadcast on every other handle. Cursors are reset afterwards so the next
//! helper starts from a clean log.

use crate::direction::Direction;
use crate::patterns::{
    tag_value, DIRECTION_TAG, LOCATION_TAG, MOVE_ACK, PEER_WORLD_JOIN, PEER_WORLD_MOVE,
    PEER_WORLD_PART, WORLD_JOIN_ACK, WORLD_PART_ACK, WORLD_USER_MODE,
};
use irct_core::{
    await_match, send_command, verify_all, verify_sync, AckedCommand, Expectation, HandleId,
    NoteKind, Result, SyncCheck, Topology,
};
use regex::{escape, Regex};
use std::time::Duration;

/// Join `channel` on every handle and wait for each server's echo
///
/// # Errors
/// `HarnessError::ExpectationTimeout` if a server never echoes the join.
pub async fn join_channel_all(topology: &mut Topology, channel: &str, timeout: Duration) -> Result<()> {
    let echo = format!(r"JOIN :?{}(?:\s|$)", escape(channel));
    let nicks: Vec<String> = topology.handles().map(|h| h.nick().to_string()).collect();

    for handle in topology.handles_mut() {
        send_command(handle, &format!("JOIN {channel}")).await?;
        let pattern = format!(r"^:{}!\S* {echo}", escape(handle.nick()));
        let expectation = Expectation::new(format!("{channel} joined"), &pattern)?.timeout(timeout);
        await_match(handle, &expectation).await?;
    }
    topology.skip_pending_all();
    topology.journal().note(
        NoteKind::MultiClient,
        None,
        format!("clients [{}]: joined {channel}", nicks.join(", ")),
    );
    Ok(())
}

/// `WORLD join` on `acting`; peers must see the join and the `+y` mode
///
/// # Errors
/// - `HarnessError::ExpectationTimeout` if the actor is not acknowledged
/// - `HarnessError::SyncVerificationFailed` naming every peer that missed
pub async fn verify_world_join_sync(
    topology: &mut Topology,
    acting: &HandleId,
    timeout: Duration,
) -> Result<()> {
    let stimulus = AckedCommand::new("WORLD join")
        .ack(Expectation::new("world join success", WORLD_JOIN_ACK)?.timeout(timeout))
        .ack(Expectation::new("user mode +y set", WORLD_USER_MODE)?.timeout(timeout));
    let check = SyncCheck::new("world join", &[PEER_WORLD_JOIN, WORLD_USER_MODE])?.timeout(timeout);

    verify_sync(topology, acting, &stimulus, &check).await?;
    topology.skip_pending_all();
    note_sync(topology, acting, "WORLD join", "join and +y seen by all peers");
    Ok(())
}

/// `MOVE <direction>` on `acting`; peers must see the move with both tags
///
/// # Errors
/// - `HarnessError::ExpectationTimeout` if the actor is not acknowledged
/// - `HarnessError::SyncVerificationFailed` naming every peer that missed
pub async fn verify_movement_sync(
    topology: &mut Topology,
    acting: &HandleId,
    direction: Direction,
    timeout: Duration,
) -> Result<()> {
    let stimulus = AckedCommand::new(format!("MOVE {direction}"))
        .ack(Expectation::new("move success", MOVE_ACK)?.timeout(timeout));
    let check = SyncCheck::new(
        format!("move {direction}"),
        &[PEER_WORLD_MOVE, LOCATION_TAG, DIRECTION_TAG],
    )?
    .timeout(timeout);

    verify_sync(topology, acting, &stimulus, &check).await?;
    topology.skip_pending_all();
    note_sync(topology, acting, "MOVE", &format!("{direction} seen by all peers"));
    Ok(())
}

/// Leave and re-enter the world on `acting`, checking both broadcasts
///
/// # Errors
/// As `verify_world_join_sync`, for either half.
pub async fn netsplit_recovery(topology: &mut Topology, acting: &HandleId, timeout: Duration) -> Result<()> {
    let part = AckedCommand::new("WORLD part")
        .ack(Expectation::new("world part success", WORLD_PART_ACK)?.timeout(timeout));
    let part_check = SyncCheck::new("world part", &[PEER_WORLD_PART])?.timeout(timeout);
    verify_sync(topology, acting, &part, &part_check).await?;

    let rejoin = AckedCommand::new("WORLD join")
        .ack(Expectation::new("world rejoin success", WORLD_JOIN_ACK)?.timeout(timeout));
    let rejoin_check = SyncCheck::new("world rejoin", &[PEER_WORLD_JOIN])?.timeout(timeout);
    verify_sync(topology, acting, &rejoin, &rejoin_check).await?;

    topology.skip_pending_all();
    note_sync(topology, acting, "netsplit recovery", "part and rejoin seen by all peers");
    Ok(())
}

/// Require every tag pattern, in order, on every handle
///
/// Observed values of the world tags are recorded as journal notes.
///
/// # Errors
/// `HarnessError::SyncVerificationFailed` naming every handle that missed.
pub async fn verify_message_tags(topology: &mut Topology, tags: &[&str], timeout: Duration) -> Result<()> {
    let check = SyncCheck::new("message tags", tags)?.timeout(timeout);
    verify_all(topology, &check).await?;
    note_tag_values(topology, &["world/location", "world/direction"])?;
    Ok(())
}

/// Record the last consumed value of each tag key on every handle
fn note_tag_values(topology: &Topology, keys: &[&str]) -> Result<()> {
    let patterns = keys
        .iter()
        .map(|k| Regex::new(&tag_value(k)).map(|re| (*k, re)))
        .collect::<std::result::Result<Vec<_>, _>>()?;

    for handle in topology.handles() {
        let consumed = handle.inbound().lines();
        let consumed = &consumed[..handle.cursor().index().min(consumed.len())];
        for (key, re) in &patterns {
            let value = consumed
                .iter()
                .rev()
                .find_map(|line| re.captures(&line.text).map(|c| c[1].to_string()));
            if let Some(value) = value {
                tracing::debug!(handle = %handle.id(), %key, %value, "tag observed");
                topology
                    .journal()
                    .note(NoteKind::Tag, Some(handle.id()), format!("{key}={value}"));
            }
        }
    }
    Ok(())
}

fn note_sync(topology: &Topology, acting: &HandleId, action: &str, details: &str) {
    tracing::info!(server = %acting.server, %action, %details, "server sync");
    topology.journal().note(
        NoteKind::Sync,
        Some(acting),
        format!("{}: {action} - {details}", acting.server),
    );
}
