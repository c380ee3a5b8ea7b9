pub mod interface;
pub mod service;
pub mod shared;

// Backward-compatible re-exports (transitional).
pub use interface::{db, http, telephony};
pub use service::{call_flow, dispatch, webhook};
pub use shared::{config, entities, logging, ports, utils};
