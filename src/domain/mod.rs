//! Domain layer - Pure business logic.

pub mod keys;
pub mod notification;
pub mod thumbnail;
pub mod unit;
