//! Route handlers.

pub mod health;
pub mod instances;
pub mod maintenance;
