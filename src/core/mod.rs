//! Core business logic, independent of any transport.
//!
//! Every operation takes the database handle as its first argument, so callers
//! can pass a pooled connection, an open transaction or a mock.

pub mod accounts;
pub mod admin;
pub mod commission;
pub mod ledger;
pub mod notification;
pub mod orchestrator;
pub mod plan;
pub mod subscription;
pub mod unit;
