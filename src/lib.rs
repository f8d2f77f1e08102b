//! Anonymous 1:1 Stranger Chat Server Library
//!
//! Pairs anonymous users for one-on-one text chat over WebSocket. A user
//! searches; the server either joins them to a randomly chosen stranger who
//! is already waiting or queues them to wait. Either side can end the chat at
//! any time.
//!
//! # Features
//! - Random matchmaking with same-partner avoidance
//! - Chat session state machine (waiting → active → ended)
//! - Transactional session store with first-committer-wins commits
//! - Text relay between partners
//! - Operator on/off switch and monitor report
//!
//! # Architecture
//! - `Matchmaker` and `SessionMachine` hold no session state; every decision
//!   is made inside a `SessionStore` transaction
//! - Connection handlers run concurrently and call the `Dispatcher` directly
//! - The `Hub` actor owns the registry of connected users and delivers
//!   outbound messages through `mpsc` channels
//!
//! # Example
//! ```ignore
//! use std::sync::Arc;
//! use tokio::net::TcpListener;
//! use anon_chat::{handle_connection, Config, Dispatcher, HubHandle, MemoryStore, SystemSwitch};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Config::default();
//!     let listener = TcpListener::bind(&config.addr).await.unwrap();
//!     let dispatcher = Arc::new(Dispatcher::new(
//!         Arc::new(MemoryStore::new()),
//!         HubHandle::spawn(256),
//!         SystemSwitch::new(true),
//!         &config,
//!     ));
//!
//!     while let Ok((stream, _)) = listener.accept().await {
//!         tokio::spawn(handle_connection(stream, dispatcher.clone()));
//!     }
//! }
//! ```

pub mod client;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod hub;
pub mod lifecycle;
pub mod matchmaker;
pub mod message;
pub mod notifier;
pub mod session;
pub mod store;
pub mod types;

// Re-export main types for convenience
pub use client::Client;
pub use config::Config;
pub use dispatcher::{Command, CommandOutcome, Dispatcher, SystemSwitch};
pub use error::{AppError, ChatError, ConfigError, NotifyError, SendError, StoreError, TransitionError};
pub use handler::handle_connection;
pub use hub::{Hub, HubCommand, HubHandle};
pub use lifecycle::{EndOutcome, Presence, SessionMachine};
pub use matchmaker::{MatchOutcome, Matchmaker};
pub use message::{Action, ClientMessage, ErrorCode, ServerMessage};
pub use notifier::{HubNotifier, Notifier};
pub use session::{ChatSession, SessionStatus};
pub use store::{MemoryStore, SessionStore, StoreStats, StoreTransaction};
pub use types::{SessionId, UserId};
