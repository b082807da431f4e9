//! arbsat: a cross-chain arbitrage satellite.
//!
//! The engine watches price feeds across chains, detects dislocations,
//! validates and scores them, and coordinates a multi-chain liquidity
//! portfolio: locking positions, staging cross-chain execution with
//! rollback, rebalancing toward target allocations, and reconciling
//! divergent chain state by consensus.
//!
//! Layering follows `config` / `domain` / `application` /
//! `infrastructure`; the application layer only sees the boundary through
//! the port traits in [`domain::ports`].

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
