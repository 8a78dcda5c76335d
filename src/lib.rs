pub mod config;
pub mod content_api;
pub mod db;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod playback;
pub mod router;
pub mod service;
pub mod types;

pub use error::LecternError;
pub use router::{LecternState, lectern_router};
