use axum::{
    Form,
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
};
use serde::Deserialize;

use super::{Entry, append, entries};
use crate::handler::AppState;

#[derive(Debug, Deserialize)]
pub struct EntryForm {
    pub title: Option<String>,
    pub author: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct IndexParams {
    pub status: Option<String>,
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#039;"),
            c => out.push(c),
        }
    }
    out
}

fn render_index(entries: &[Entry], status: Option<&str>) -> String {
    let rows: String = entries
        .iter()
        .map(|entry| {
            format!(
                "            <tr>\n                <td>{}</td>\n                <td>{}</td>\n                <td>{}</td>\n            </tr>\n",
                escape(&entry.key),
                escape(&entry.author),
                escape(&entry.title),
            )
        })
        .collect();

    let banner = status
        .map(|s| format!("    <p class=\"status\">{}</p>\n", escape(s)))
        .unwrap_or_default();

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>bookshelf</title>
</head>
<body>
{banner}    <table>
        <thead>
            <tr>
                <th>id</th>
                <th>author</th>
                <th>title</th>
            </tr>
        </thead>
        <tbody>
{rows}        </tbody>
    </table>
    <p><a href="/add">Add an entry</a></p>
</body>
</html>
"#
    )
}

pub async fn index(State(state): State<AppState>, Query(params): Query<IndexParams>) -> Response {
    match entries(&state.books).await {
        Ok(entries) => Html(render_index(&entries, params.status.as_deref())).into_response(),
        Err(e) => {
            tracing::error!(error = %crate::unpack_error(&e), "failed to load entries");
            (StatusCode::INTERNAL_SERVER_ERROR, Html("<p>Server Error</p>")).into_response()
        }
    }
}

pub async fn add_form() -> Html<&'static str> {
    Html(
        r#"
        <!doctype html>
        <html>
            <head><title>bookshelf</title></head>
            <body>
                <form action="/add" method="post">
                    <label>
                        Title
                        <input type="text" name="title">
                    </label>
                    <label>
                        Author
                        <input type="text" name="author">
                    </label>

                    <input type="submit" value="Add">
                </form>
            </body>
        </html>
        "#,
    )
}

pub async fn add_entry(State(state): State<AppState>, Form(form): Form<EntryForm>) -> Redirect {
    let status = match append(&state.books, form.title, form.author).await {
        Ok(_) => "Entry added",
        Err(e) => {
            tracing::error!(error = %crate::unpack_error(&e), "failed to append entry");
            "Entry not added"
        }
    };
    Redirect::to(&format!("/index?status={}", urlencoding::encode(status)))
}
