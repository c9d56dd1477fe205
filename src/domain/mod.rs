//! Domain types for the offline payment flow and the ports the application
//! layer talks through.

pub mod claim;
pub mod destination;
pub mod message;
pub mod ports;
pub mod session;
