//! gridsched-cluster — peer gossip for the grid scheduler.
//!
//! Servers periodically publish a snapshot of what they know and merge the
//! snapshots their peers send them. Paths are tracked per server: each hop
//! adds one to `DISTANCE` and the link cost to `MIGRATE_COST`, and the
//! cheapest fresh path wins.
//!
//! # Architecture
//!
//! ```text
//! Local server
//!   ├── gossip::snapshot()          → GossipBatch for every peer
//!   └── peers::update_peer_status() ← GossipBatch from one peer
//!       ├── relevant_update()       fresh? newer? same or cheaper path?
//!       ├── prune                   entities the origin stopped publishing
//!       └── update                  strictly newer entities only
//! ```
//!
//! The transport is external; this crate only shapes and merges batches.

pub mod gossip;
pub mod peers;

pub use gossip::{GossipBatch, snapshot};
pub use peers::{PeerUpdateReport, RejectReason, relevant_update, remove_stale_data, update_peer_status};
