//! Actor owning the monitor map
//!
//! The scheduler runs as an independent task and is the single writer of
//! the pair id to runner entry mapping. Admin actions and startup reach it
//! through a cloneable [`scheduler::SchedulerHandle`].
//!
//! ```text
//!   Monitor (admin) ── SchedulerCommand ──> SchedulerActor ── schedule/cancel ──> PeriodicRunner
//!                                                │                                    │ tick
//!                                                └── schedule broadcasts              ▼
//!                                                                     StatusTransitionEngine::run_check
//! ```

pub mod messages;
pub mod scheduler;
