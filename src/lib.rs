//! Seatrelay: brokered, encrypted seat-grabbing on behalf of many users.

pub mod api;
pub mod cipher;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod registry;
pub mod task;
pub mod worker;
