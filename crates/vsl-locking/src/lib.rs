//! VSL Locking - exclusive subtree locks for local service writes.
//!
//! A service that wants to modify part of an agent's tree first locks the
//! subtree, stages writes under it, then either commits them to storage in
//! one batch or rolls them back.
//!
//! ```text
//! acquire("/a") ──► stage_write("/a/value", "42") ──► commit("/a")
//!                                                 └─► rollback("/a")
//!                                   (validity runs out) ──► expired
//! ```
//!
//! Locks never overlap. A holder asking for a broader or narrower lock than
//! one it already holds gets its old lock committed and replaced. Locks
//! that outlive their validity are dropped by the [`LockExpirationSweeper`]
//! with their staged writes discarded.

mod callback;
mod config;
mod error;
mod subtree;
mod sweeper;
mod table;

pub use callback::{ChannelCallback, LockCallback, LockEvent, NoopCallback};
pub use config::LockConfig;
pub use error::{Error, Result};
pub use subtree::{LockInfo, LockedSubtree, Requester};
pub use sweeper::LockExpirationSweeper;
pub use table::{LockTable, SweepReport};
