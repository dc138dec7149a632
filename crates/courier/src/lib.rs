//! # Courier
//!
//! An update dispatch pipeline for chat bots.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌────────┐   ┌──────────────────────────────────────────────┐
//! │  update  │──▶│ Router │──▶│ recovery ▶ mention ▶ dedup ▶ auth ▶ user mw  │──▶ handler
//! │  stream  │   │        │   └──────────────────────────────────────────────┘
//! └──────────┘   └────────┘              errors ──▶ ErrorHandler
//! ```
//!
//! - **Core**: the update model, the execution [`Context`](core::Context), the
//!   [`PlatformClient`](core::PlatformClient) trait and the callback data codec
//! - **Framework**: handlers and middleware as tower services, the router,
//!   single-flight deduplication, rate limiting, broadcast and retry helpers
//! - **Runtime**: configuration, logging and the [`App`](runtime::App) shell
//! - **TMA**: signing and validation of mini-app launch tokens
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use courier::prelude::*;
//!
//! async fn start(ctx: Context, update: Update) -> Result<(), BoxError> {
//!     let uid: Option<i64> = ctx.get_as("uid");
//!     tracing::info!(?uid, "start");
//!     Ok(())
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), RuntimeError> {
//!     let config = ConfigLoader::new().load()?;
//!     let app = App::from_config(config, client)
//!         .bind_command("start", start)
//!         .build()?;
//!     app.run_until_signal(updates).await;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `json-log`: JSON log output

pub use courier_core as core;
pub use courier_framework as framework;
pub use courier_runtime as runtime;
pub use courier_tma as tma;

/// Prelude module for convenient imports.
pub mod prelude {
    // Application shell
    pub use courier_runtime::{App, AppBuilder, ConfigLoader, CourierConfig, RuntimeError};

    // Update model and platform access
    pub use courier_core::{
        ApiError, ApiResult, BoxedClient, CallbackQuery, Context, Message, OutgoingMessage,
        PlatformClient, Update, marshal_data, unmarshal_data,
    };

    // Pipeline building blocks
    pub use courier_framework::{
        BoxError, BroadcastOptions, ErrorHandler, Handler, Middleware, Next, Route, RouteSpec,
        retry_on_throttle,
    };

    // Mini-app auth
    pub use courier_tma::{TmaAuth, TmaClaims};
}
