//! Bookstore backend core
//!
//! Two processes share one SQLite database:
//!
//! - `bookstore-server`: HTTP API (cart, checkout, payments, inventory)
//! - `bookstore-worker`: job queue consumer and cron scheduler
//!
//! # Module layout
//!
//! ```text
//! bookstore-server/src/
//! ├── api/         # axum routers and handlers
//! ├── auth/        # JWT + service token middleware
//! ├── db/          # pool, migrations, repositories
//! ├── inventory/   # reservation engine
//! ├── orders/      # cart, pricing, checkout, lifecycle
//! ├── payments/    # gateways, callbacks, refunds
//! ├── jobs/        # durable queue, cron scheduler
//! ├── worker/      # worker runtime and task handlers
//! ├── keyspace/    # TTL key/value store, cache, locks
//! └── notify/      # email senders, templates, outbox
//! ```

pub mod api;
pub mod auth;
pub mod config;
pub mod context;
pub mod db;
pub mod inventory;
pub mod invariants;
pub mod jobs;
pub mod keyspace;
pub mod logger;
pub mod notify;
pub mod orders;
pub mod payments;
pub mod state;
pub mod worker;

#[cfg(test)]
mod test_support;

pub use config::Config;
pub use context::RequestContext;
pub use state::AppState;
