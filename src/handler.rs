use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Serialize;
use serde_json::{Map, Value};

use tracing::info;

use crate::api::{
    APIResponse, BOOK_CREATED, BOOK_DELETED, BOOK_NOT_FOUND, BOOK_UPDATED, NO_BOOKS,
    SERVER_ERROR, UNAUTHENTICATED, ValidationResponse,
};
use crate::auth::SessionGate;
use crate::error::BookError;
use crate::model::{Book, parse_book_id};
use crate::store::BookStore;

#[derive(Clone)]
pub struct AppState {
    pub books: Arc<BookStore>,
    pub session: Arc<SessionGate>,
}

pub fn book_routes() -> Router<AppState> {
    Router::new()
        .route("/books", get(list_books).post(create_book))
        .route(
            "/books/:id",
            get(get_book).put(update_book).delete(delete_book),
        )
}

fn respond<T: Serialize>(status: StatusCode, body: T) -> Response {
    (status, Json(body)).into_response()
}

fn not_found() -> Response {
    respond(StatusCode::NOT_FOUND, APIResponse::new_from_msg(BOOK_NOT_FOUND))
}

fn failure(err: BookError, action: &str) -> Response {
    match err {
        BookError::NotFound => not_found(),
        BookError::Validation(errors) => {
            let fields: Vec<&str> = errors.fields().collect();
            info!(?fields, "rejected {} request", action);
            respond(StatusCode::UNPROCESSABLE_ENTITY, ValidationResponse::new(&errors))
        }
        BookError::Store(_) => {
            tracing::error!(error = %crate::unpack_error(&err), "failed to {}", action);
            respond(
                StatusCode::INTERNAL_SERVER_ERROR,
                APIResponse::new_from_msg(SERVER_ERROR),
            )
        }
    }
}

/// Unparsable or missing JSON bodies are treated as an empty object.
fn read_payload(payload: Result<Json<Value>, JsonRejection>) -> Value {
    match payload {
        Ok(Json(value)) => value,
        Err(rejection) => {
            tracing::debug!(reason = %rejection.body_text(), "ignoring request body");
            Value::Object(Map::new())
        }
    }
}

pub async fn healthcheck() -> impl IntoResponse {
    info!("got healthcheck request");
    Json(APIResponse::new_from_msg("ok"))
}

pub async fn list_books(State(state): State<AppState>) -> Response {
    match state.books.list().await {
        Ok(Some(books)) => {
            info!(count = books.len(), "got books");
            respond(StatusCode::OK, APIResponse::with_data(books))
        }
        Ok(None) => respond(
            StatusCode::OK,
            APIResponse::with_msg_and_data(NO_BOOKS, Vec::<Book>::new()),
        ),
        Err(e) => failure(e, "list books"),
    }
}

pub async fn create_book(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Response {
    let payload = read_payload(payload);

    match state.books.create(&payload).await {
        Ok(book) => respond(
            StatusCode::CREATED,
            APIResponse::with_msg_and_data(BOOK_CREATED, book),
        ),
        Err(e) => failure(e, "create book"),
    }
}

pub async fn get_book(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let Some(id) = parse_book_id(&id) else {
        return not_found();
    };

    match state.books.show(id).await {
        Ok(book) => respond(StatusCode::OK, APIResponse::with_data(book)),
        Err(e) => failure(e, "get book"),
    }
}

pub async fn update_book(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Response {
    let Some(id) = parse_book_id(&id) else {
        return not_found();
    };
    let payload = read_payload(payload);

    match state.books.update(id, &payload).await {
        Ok(book) => respond(
            StatusCode::OK,
            APIResponse::with_msg_and_data(BOOK_UPDATED, book),
        ),
        Err(e) => failure(e, "update book"),
    }
}

pub async fn delete_book(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let Some(id) = parse_book_id(&id) else {
        return not_found();
    };

    match state.books.destroy(id).await {
        Ok(()) => respond(StatusCode::OK, APIResponse::new_from_msg(BOOK_DELETED)),
        Err(e) => failure(e, "delete book"),
    }
}

pub async fn current_user(State(state): State<AppState>, headers: HeaderMap) -> Response {
    match state.session.authenticate(&headers) {
        Some(user) => respond(StatusCode::OK, user),
        None => respond(
            StatusCode::UNAUTHORIZED,
            APIResponse::new_from_msg(UNAUTHENTICATED),
        ),
    }
}
