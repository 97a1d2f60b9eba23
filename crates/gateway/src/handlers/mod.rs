//! API handlers module

pub mod auth;
pub mod health;
pub mod imports;
pub mod metrics;
pub mod portal;
pub mod sheets;
