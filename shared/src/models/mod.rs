//! Data models
//!
//! Shared between the API process and the worker (and clients, via API).
//! Money is `rust_decimal::Decimal` (serialized as a string), timestamps
//! are Unix milliseconds, ids are UUID strings. Row mapping lives next to
//! the SQL in the server crate.

pub mod book;
pub mod cart;
pub mod order;
pub mod payment;
pub mod promotion;
pub mod warehouse;

// Re-exports
pub use book::*;
pub use cart::*;
pub use order::*;
pub use payment::*;
pub use promotion::*;
pub use warehouse::*;
