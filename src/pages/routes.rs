use axum::{Router, routing::get};

use super::handler;
use crate::handler::AppState;

/// The form also answers at `/tambah`, its original address.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/index", get(handler::index))
        .route("/add", get(handler::add_form).post(handler::add_entry))
        .route("/tambah", get(handler::add_form).post(handler::add_entry))
}
