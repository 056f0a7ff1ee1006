//! # Stoat Lock
//!
//! Named mutual exclusion for the stoat test runtime, visible to every
//! process in a run. Lock names are values serialized to a canonical
//! string, so structurally equal names contend with each other without any
//! shared memory; coordination happens through a [`LockArbiter`], either
//! the in-process [`LocalArbiter`] or a [`ChannelArbiter`] endpoint
//! speaking the acquire/release protocol to a shared [`ArbiterServer`].
//! Grants per name are strictly first-requested-first-granted.

#![warn(clippy::all)]

pub mod arbiter;
pub mod channel;
pub mod coordinator;

pub use arbiter::{LocalArbiter, LockArbiter, LockToken};
pub use channel::{ArbiterReply, ArbiterRequest, ArbiterServer, ChannelArbiter};
pub use coordinator::{LockCoordinator, LockGuard};
