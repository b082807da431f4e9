//! Infrastructure: persistence, adapters over the boundary ports, and
//! observability. Everything here is replaceable without touching the
//! application layer.

pub mod adapters;
pub mod feeds;
pub mod observability;
pub mod persistence;
