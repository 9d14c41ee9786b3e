//! Booking and office-membership core for the desky backend.
//!
//! [`engine::Engine`] owns booking conflict detection, the attendee and
//! membership relations (each stored as two inverse records written
//! atomically) and the office guards that gate membership changes.
//! [`accounts::Accounts`] handles registration and authentication. Both run
//! against any [`store::Store`]; [`store::MemoryStore`] is the in-process one.

pub mod accounts;
pub mod config;
pub mod engine;
pub mod limits;
pub mod model;
pub mod observability;
pub mod ports;
pub mod response;
pub mod secrets;
pub mod store;
