//! Laboratory report approval workflow and notification engine
//!
//! Reports move through per-type status graphs under role and field
//! permissions, with a per-field correction ledger, optimistic-concurrency
//! commits, and best-effort notification routing toward the lab departments
//! or the client's configured recipients.

pub mod correction;
pub mod dispatch;
pub mod error;
pub mod esign;
pub mod graph;
pub mod notify;
pub mod permission;
pub mod report;
pub mod service;
pub mod store;
pub mod utils;
