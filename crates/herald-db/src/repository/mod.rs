//! Repository layer — query functions organized by table.
//!
//! Every function takes a bare `AnyConnection` so it can run either on a
//! pooled connection or inside the transaction of [`crate::membership::update_room`].

pub mod joined_hosts;
pub mod rooms;
