//! Client-side synchronization core for a drag-reorderable task board.
//!
//! Users move work items between status columns with instant feedback while
//! a remote authority confirms or rejects each move, and other collaborators'
//! changes arrive over a push channel. This crate reconciles the three
//! sources of truth (the live gesture, in-flight mutations, remote events)
//! without ever exposing a half-applied board to the rendering layer.
//!
//! The logic lives in [`engine::SyncCore`], which does no I/O and takes time
//! as an argument. [`driver::Driver`] runs it on a tokio task and executes
//! the [`engine::Effect`]s it returns.
//!
//! ## Module layout
//!
//! | Module | Role |
//! |--------|------|
//! | [`engine`] | Composition of the components below, testable [`engine::SyncCore`] |
//! | [`item`] | Work items, statuses and slots |
//! | [`store`] | Board state store and the published rendering view |
//! | [`session`] | Drag session state machine |
//! | [`pending`] | Ledger of in-flight mutations |
//! | [`coordinator`] | Optimistic moves, confirmation and rollback |
//! | [`listener`] | Buffering and merging of remote events |
//! | [`scheduler`] | Debounced reconciliation refetches |
//! | [`driver`] | Async run loop and the rendering-layer handle |
//! | [`api`] | Fetch and Mutation API traits |
//! | [`http`] | reqwest implementation of the API traits |
//! | [`feed`] | Websocket push feed with reconnect |
//! | [`wire`] | Push frame model and decoding |
//! | [`config`] | Environment and CLI configuration |
//! | [`consts`] | Default timings and capacities |
//! | [`error`] | Error taxonomy and the [`error::ErrorCode`] trait |

pub mod api;
pub mod config;
pub mod consts;
pub mod coordinator;
pub mod driver;
pub mod engine;
pub mod error;
pub mod feed;
pub mod http;
pub mod item;
pub mod listener;
pub mod pending;
pub mod scheduler;
pub mod session;
pub mod store;
pub mod wire;
