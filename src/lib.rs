//! # Rescuegrid - Emergency Dispatch Simulator
//!
//! Rescuegrid ingests emergency requests from a POSIX message queue, picks
//! the most suitable idle rescue units, and simulates their whole
//! travel-and-service lifecycle on a grid, reporting every status change
//! through a structured event log.
//!
//! ## Features
//!
//! - **Priority Scheduling**: composite scores (base priority, distance to
//!   the nearest idle unit, aging bonus) order the waiting queue; starvation
//!   is prevented by monotonic aging.
//! - **Preemption**: higher-priority emergencies reclaim rescuers from
//!   strictly lower-priority active ones; interrupted work is paused with
//!   partial credit and resumed later.
//! - **Timeouts**: a timekeeper thread expires emergencies that waited
//!   longer than their priority allows.
//! - **Digital Twins**: every configured rescue unit is simulated
//!   individually — position, status, travel time at its own speed.
//! - **Structured Event Log**: one line per transition, stable event ids and
//!   categories, consumable by operator tooling.
//! - **Graceful Shutdown**: SIGINT/SIGTERM drain every in-flight emergency
//!   and return every rescuer to base.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use rescuegrid::config::Config;
//! use rescuegrid::dispatch::{Dispatcher, ScheduleKnobs, DEFAULT_WORKERS};
//! use rescuegrid::eventlog::EventLog;
//! use rescuegrid::ingress::MqConsumer;
//! use rescuegrid::validation::validate_config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load(".").await?;
//!     validate_config(&config)?;
//!
//!     let events = Arc::new(EventLog::to_file("rescuegrid.log")?);
//!     let dispatcher = Arc::new(Dispatcher::new(
//!         Arc::new(config.catalog.clone()),
//!         ScheduleKnobs::from_environment(&config.environment),
//!         events.clone(),
//!     ));
//!     dispatcher.start(DEFAULT_WORKERS)?;
//!     let consumer = MqConsumer::start(&config.environment, dispatcher.clone(), events)?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     consumer.shutdown();
//!     dispatcher.shutdown();
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`catalog`] - Immutable grid, rescuer-type and emergency-type data
//! - [`config`] - Plain-text configuration loading and parsing
//! - [`validation`] - Cross-field configuration checks
//! - [`dispatch`] - Waiting queue, allocator, preemption, workers, monitor
//! - [`ingress`] - POSIX message queue consumer and wire-format validation
//! - [`eventlog`] - Structured append-only event sink
//! - [`metrics`] - Process-wide dispatch counters
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐    ┌────────────────────────────┐
//! │  Message     │───→│       Dispatcher Core      │
//! │  Queue       │    │  queue · allocator · pool  │
//! └──────────────┘    └────────────────────────────┘
//!                        │                 │
//!              ┌──────────────┐    ┌──────────────┐
//!              │ Aging/Timeout│    │  Event Log   │
//!              │   Monitor    │    │    Sink      │
//!              └──────────────┘    └──────────────┘
//! ```

pub mod catalog;
pub mod config;
pub mod dispatch;
pub mod eventlog;
pub mod ingress;
pub mod logutil;
pub mod metrics;
pub mod validation;
