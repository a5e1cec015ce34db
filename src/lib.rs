//! Email operator — reconciles declarative `Email` records into exactly one
//! provider send each.

pub mod config;
pub mod controller;
pub mod error;
pub mod resources;
pub mod store;
