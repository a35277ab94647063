//! Command handlers

pub mod common;
pub mod order;
pub mod score;
pub mod simulate;
pub mod sweep;
