//! Real-time collaborative sync engine for a shared floor graph and room
//! set.
//!
//! ARCHITECTURE
//! ============
//! Several editors mutate the same nodes and rooms concurrently. Each
//! client applies its edits optimistically, reconciles them against the
//! server-issued confirmation timestamp, and broadcasts the confirmed diff
//! to peers over a persistent channel. Remote patches that race a local
//! in-flight mutation are queued per entity and replayed in timestamp
//! order once the mutation settles; stale patches are discarded with a
//! user-visible warning rather than silently dropped.
//!
//! The embedding UI owns a [`session::FloorSession`] per open floor,
//! feeds it UI edits ([`edit::Edit`]) and channel messages, and drains
//! [`alert::Alert`]s for display. The persistence service behind
//! [`persist::Persistence`] is the source of truth for ordering; this
//! engine keeps every client consistent with it, it does not merge
//! semantically conflicting edits.

pub mod alert;
pub mod config;
pub mod dispatch;
pub mod edit;
pub mod history;
pub mod lock;
pub mod model;
pub mod mst;
pub mod patch;
pub mod persist;
pub mod resolve;
pub mod session;
pub mod store;
pub mod sync;
