//! World-module scenarios
//!
//! Every scenario negotiates the world capability first (skipping on NAK)
//! and joins the world channel on all clients before its own checks.

use crate::capability::negotiate_capability;
use crate::direction::Direction;
use crate::patterns::LOCATION_TAG;
use crate::world::{
    join_channel_all, netsplit_recovery, verify_message_tags, verify_movement_sync,
    verify_world_join_sync,
};
use async_trait::async_trait;
use irct_core::{
    send_command, ConfigError, HandleId, HarnessConfig, HarnessError, NoteKind, Result, Scenario,
    ScenarioOutcome, Topology,
};
use std::sync::Arc;

/// Acting handle from the configuration
///
/// # Errors
/// `HarnessError::Config` when none is configured.
pub fn acting_handle(config: &HarnessConfig) -> Result<HandleId> {
    config.acting.clone().ok_or_else(|| {
        HarnessError::Config(ConfigError::Invalid("no acting handle configured".to_string()))
    })
}

/// Capability negotiation and channel join shared by every scenario
///
/// Returns the skip outcome when any server refused the capability.
async fn prepare(topology: &mut Topology, config: &HarnessConfig) -> Result<Option<ScenarioOutcome>> {
    let timeout = config.expect_timeout();
    let status = negotiate_capability(topology, &config.capability, timeout).await?;
    if let Some(skip) = status.skip_outcome(&config.capability) {
        return Ok(Some(skip));
    }
    join_channel_all(topology, &config.world_channel, timeout).await?;
    Ok(None)
}

/// Capability is acknowledged by every server
#[derive(Debug, Default)]
pub struct CapabilityNegotiation;

#[async_trait]
impl Scenario for CapabilityNegotiation {
    fn name(&self) -> &str {
        "capability_negotiation"
    }

    fn description(&self) -> &str {
        "world capability ACK'd on every server"
    }

    async fn run(&self, topology: &mut Topology, config: &HarnessConfig) -> Result<ScenarioOutcome> {
        if let Some(skip) = prepare(topology, config).await? {
            return Ok(skip);
        }
        Ok(ScenarioOutcome::Completed)
    }
}

/// `WORLD join` propagates to every server
#[derive(Debug, Default)]
pub struct WorldJoinSync;

#[async_trait]
impl Scenario for WorldJoinSync {
    fn name(&self) -> &str {
        "world_join_sync"
    }

    fn description(&self) -> &str {
        "WORLD join seen with +y on every peer"
    }

    async fn run(&self, topology: &mut Topology, config: &HarnessConfig) -> Result<ScenarioOutcome> {
        if let Some(skip) = prepare(topology, config).await? {
            return Ok(skip);
        }
        let acting = acting_handle(config)?;
        verify_world_join_sync(topology, &acting, config.expect_timeout()).await?;
        Ok(ScenarioOutcome::Completed)
    }
}

/// Moves in all four directions propagate with location and direction tags
#[derive(Debug, Default)]
pub struct MovementSync;

#[async_trait]
impl Scenario for MovementSync {
    fn name(&self) -> &str {
        "movement_sync"
    }

    fn description(&self) -> &str {
        "MOVE in every direction seen with world tags on every peer"
    }

    async fn run(&self, topology: &mut Topology, config: &HarnessConfig) -> Result<ScenarioOutcome> {
        if let Some(skip) = prepare(topology, config).await? {
            return Ok(skip);
        }
        let acting = acting_handle(config)?;
        let timeout = config.expect_timeout();
        verify_world_join_sync(topology, &acting, timeout).await?;
        for direction in Direction::ALL {
            verify_movement_sync(topology, &acting, direction, timeout).await?;
        }
        Ok(ScenarioOutcome::Completed)
    }
}

/// Leaving and re-entering the world survives across servers
#[derive(Debug, Default)]
pub struct NetsplitRecovery;

#[async_trait]
impl Scenario for NetsplitRecovery {
    fn name(&self) -> &str {
        "netsplit_recovery"
    }

    fn description(&self) -> &str {
        "WORLD part then WORLD join seen on every peer"
    }

    async fn run(&self, topology: &mut Topology, config: &HarnessConfig) -> Result<ScenarioOutcome> {
        if let Some(skip) = prepare(topology, config).await? {
            return Ok(skip);
        }
        let acting = acting_handle(config)?;
        let timeout = config.expect_timeout();
        verify_world_join_sync(topology, &acting, timeout).await?;
        netsplit_recovery(topology, &acting, timeout).await?;
        Ok(ScenarioOutcome::Completed)
    }
}

/// The location tag reaches every client, the mover included
#[derive(Debug, Default)]
pub struct MessageTags;

#[async_trait]
impl Scenario for MessageTags {
    fn name(&self) -> &str {
        "message_tags"
    }

    fn description(&self) -> &str {
        "@world/location= present on every server after a move"
    }

    async fn run(&self, topology: &mut Topology, config: &HarnessConfig) -> Result<ScenarioOutcome> {
        if let Some(skip) = prepare(topology, config).await? {
            return Ok(skip);
        }
        let acting = acting_handle(config)?;
        let timeout = config.expect_timeout();
        verify_world_join_sync(topology, &acting, timeout).await?;

        let direction = Direction::East;
        send_command(topology.handle_mut(&acting)?, &format!("MOVE {direction}")).await?;
        topology.journal().note(
            NoteKind::MultiClient,
            Some(&acting),
            format!("{} clients checked for world tags", topology.handle_count()),
        );
        verify_message_tags(topology, &[LOCATION_TAG], timeout).await?;
        Ok(ScenarioOutcome::Completed)
    }
}

/// Every world scenario, in run order
#[must_use]
pub fn catalog() -> Vec<Arc<dyn Scenario>> {
    vec![
        Arc::new(CapabilityNegotiation),
        Arc::new(WorldJoinSync),
        Arc::new(MovementSync),
        Arc::new(NetsplitRecovery),
        Arc::new(MessageTags),
    ]
}

/// Scenarios whose names appear in `names`, in catalog order
///
/// An empty selection means the whole catalog.
///
/// # Errors
/// `HarnessError::Config` naming the first unknown scenario.
pub fn select(names: &[String]) -> Result<Vec<Arc<dyn Scenario>>> {
    let all = catalog();
    if let Some(unknown) = names.iter().find(|n| all.iter().all(|s| s.name() != n.as_str())) {
        return Err(HarnessError::Config(ConfigError::Invalid(format!(
            "unknown scenario {unknown:?}"
        ))));
    }
    if names.is_empty() {
        return Ok(all);
    }
    Ok(all
        .into_iter()
        .filter(|s| names.iter().any(|n| n == s.name()))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_names_are_unique() {
        let names: Vec<_> = catalog().iter().map(|s| s.name().to_string()).collect();
        let mut deduped = names.clone();
        deduped.sort();
        deduped.dedup();
        assert_eq!(names.len(), deduped.len());
    }

    #[test]
    fn select_filters_in_catalog_order() {
        let picked = select(&["message_tags".to_string(), "world_join_sync".to_string()]).unwrap();
        let names: Vec<_> = picked.iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["world_join_sync", "message_tags"]);
        assert_eq!(select(&[]).unwrap().len(), 5);
    }

    #[test]
    fn select_rejects_unknown() {
        assert!(matches!(
            select(&["teleport".to_string()]),
            Err(HarnessError::Config(_))
        ));
    }

    #[test]
    fn missing_acting_handle_is_config_error() {
        assert!(acting_handle(&HarnessConfig::default()).is_err());
    }
}
