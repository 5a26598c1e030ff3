//! IRCT World - world-module scenarios
//!
//! Helpers and scenarios checking that the world module keeps state in sync
//! across linked servers: capability negotiation, world join, movement with
//! location/direction tags, part/rejoin recovery, and tag presence.

pub mod capability;
pub mod direction;
pub mod patterns;
pub mod scenarios;
pub mod world;

pub use capability::{negotiate_capability, CapabilityStatus};
pub use direction::{Direction, UnknownDirection};
pub use scenarios::{
    acting_handle, catalog, select, CapabilityNegotiation, MessageTags, MovementSync,
    NetsplitRecovery, WorldJoinSync,
};
pub use world::{
    join_channel_all, netsplit_recovery, verify_message_tags, verify_movement_sync,
    verify_world_join_sync,
};
