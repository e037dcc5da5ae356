//! # Engine Worker Pool
//!
//! A bounded pool of long-lived external engine processes, each serving
//! one request at a time, and the transactional dispatch primitive built
//! on top of it.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Dispatcher                            │
//! │   (borrow → execute task → return-or-invalidate, no retry)  │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                           Pool                               │
//! │  (idle/active partition, capacity cap, eviction cycle)      │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       WorkerFactory                          │
//! │    (create / destroy / health-check one engine process)     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! A worker is owned by the pool while idle and by exactly one in-flight
//! [`Dispatcher::run`] call while active. A task that completes puts its
//! worker back into circulation. A task that fails, for any reason, gets
//! its worker destroyed, because the backing process may be in an
//! indeterminate state. The background eviction cycle reclaims workers
//! that sat idle too long or stopped responding, and keeps a configured
//! minimum of warm idle workers around.
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use enginepool::process::{EngineProcessConfig, EngineProcessFactory};
//! use enginepool::{Dispatcher, Pool, PoolConfig};
//!
//! let config = EngineProcessConfig::new("stockfish").with_quit_command("quit");
//! let pool = Pool::new(EngineProcessFactory::new(config), PoolConfig::default())?;
//! let dispatcher = Dispatcher::new(Arc::new(pool));
//!
//! let greeting = dispatcher
//!     .run(|engine| {
//!         Box::pin(async move {
//!             engine.send_line("uci").await?;
//!             engine.read_line().await
//!         })
//!     })
//!     .await?;
//! ```

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod factory;
pub mod pool;
pub mod process;
pub mod testing;
pub mod worker;

pub use config::PoolConfig;
pub use dispatcher::Dispatcher;
pub use error::{DispatchError, PoolError};
pub use factory::WorkerFactory;
pub use pool::Pool;
pub use worker::PooledWorker;
