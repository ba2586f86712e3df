mod error;
mod handlers;
mod helpers;
mod router;
mod types;

use std::path::PathBuf;

pub use error::bad_json;
pub use router::handle_request;
pub use types::{AppState, Request};

/// Opens `path` as the active workspace outside of a request.
pub fn open_workspace(state: &mut AppState, path: PathBuf) -> Result<(), String> {
    handlers::core::select_workspace(state, path)
        .map(|_| ())
        .map_err(|e| e.message)
}
