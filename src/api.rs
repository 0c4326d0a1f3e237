use crate::model::ValidationErrors;
use serde::Serialize;

pub const NO_BOOKS: &str = "No books found";
pub const BOOK_CREATED: &str = "Book created successfully";
pub const BOOK_UPDATED: &str = "Book updated successfully";
pub const BOOK_DELETED: &str = "Book deleted successfully";
pub const BOOK_NOT_FOUND: &str = "Book not found";
pub const SERVER_ERROR: &str = "Server Error";
pub const UNAUTHENTICATED: &str = "Unauthenticated.";

#[derive(Debug, Serialize)]
pub struct APIResponse<T> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> APIResponse<T> {
    pub fn new(msg: Option<&str>, data: Option<T>) -> Self {
        APIResponse {
            message: msg.map(str::to_owned),
            data,
        }
    }

    pub fn with_data(data: T) -> Self {
        APIResponse::new(None, Some(data))
    }

    pub fn with_msg_and_data(msg: &str, data: T) -> Self {
        APIResponse::new(Some(msg), Some(data))
    }
}

impl APIResponse<()> {
    pub fn new_from_msg(msg: &str) -> Self {
        APIResponse::new(Some(msg), None)
    }
}

#[derive(Debug, Serialize)]
pub struct ValidationResponse<'a> {
    pub message: String,
    pub errors: &'a ValidationErrors,
}

impl<'a> ValidationResponse<'a> {
    pub fn new(errors: &'a ValidationErrors) -> Self {
        ValidationResponse {
            message: errors.summary(),
            errors,
        }
    }
}
