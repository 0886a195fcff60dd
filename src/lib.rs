//! Camp Bug Hunter - bug reports and reward coins for a Minecraft community
//!
//! Players report bugs they find on the server. When an administrator marks a
//! report FIXED, the reporter is credited with reward coins by severity.
//! Coins are spent on rewards whose in-game commands are queued for the
//! Minecraft plugin to pick up.
//!
//! # Moving parts
//!
//! 1. `api` - JSON endpoints for the web front end and the plugin
//! 2. `storage` - PostgreSQL or SQLite persistence behind one trait
//! 3. `session` - HMAC-signed admin cookie
//! 4. `housekeeping` - background purge of stale registration codes

pub mod api;
pub mod codes;
pub mod config;
pub mod error;
pub mod evidence;
pub mod housekeeping;
pub mod models;
pub mod password;
pub mod rewards;
pub mod server;
pub mod session;
pub mod storage;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use server::{create_router, run_server, AppState};
pub use session::SessionSigner;
pub use storage::{open_storage, PgStorage, SqliteStorage, Storage};
