//! # Server Components
//!
//! ## Core ([`counter`], [`web`])
//! Holds the queue number and serves it to displays and admins over one
//! HTTP listener.
//!
//! ## Middleware ([`middleware`])
//! Runs the LAN election, binds the listener once elected, announces the
//! instance and stands down when another server wins.

pub mod counter;
pub mod middleware;
pub mod operator;
pub mod web;

pub use counter::{Command, CounterService};
pub use middleware::{ConflictTracker, ConflictVerdict, RunOutcome, ServerMiddleware, ServerRole};
pub use operator::{ConsoleOperator, Operator, YieldReason};
