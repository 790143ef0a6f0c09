/// Worker SDK
///
/// Building blocks for processes that execute tasks:
/// - `TaskHandler` trait and a (process, task) keyed handler registry
/// - axum routes for the engine's health probe and job callback
/// - reqwest client for the engine's REST API

pub mod handler;

pub mod client;

pub mod runtime;

pub use client::EngineClient;
pub use handler::{FnHandler, HandlerRegistry, TaskHandler};
pub use runtime::{worker_routes, WorkerRuntime};
