//! Demo handlers backed by an in-memory catalogue.
//!
//! Each handler reports the queries it would send to a database through the shared
//! [`QueryLog`](crate::capture::QueryLog). `/authors` deliberately loads each author's books
//! with one query per author, so it shows up as a repeated query in the inspector's output.

use axum::{Json, extract::State};
use serde::Serialize;

use crate::AppState;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Book {
    pub id: u64,
    pub title: &'static str,
    pub author_id: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Author {
    pub id: u64,
    pub name: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuthorWithBooks {
    #[serde(flatten)]
    pub author: Author,
    pub books: Vec<Book>,
}

const AUTHORS: &[Author] = &[
    Author { id: 1, name: "Ursula K. Le Guin" },
    Author { id: 2, name: "Octavia E. Butler" },
    Author { id: 3, name: "Stanisław Lem" },
];

const BOOKS: &[Book] = &[
    Book { id: 1, title: "The Dispossessed", author_id: 1 },
    Book { id: 2, title: "The Left Hand of Darkness", author_id: 1 },
    Book { id: 3, title: "Kindred", author_id: 2 },
    Book { id: 4, title: "Parable of the Sower", author_id: 2 },
    Book { id: 5, title: "Solaris", author_id: 3 },
];

/// Stand-in for a round trip to the database
async fn fetch<T>(rows: impl IntoIterator<Item = T>) -> Vec<T> {
    tokio::task::yield_now().await;
    rows.into_iter().collect()
}

/// List all books (one query)
pub async fn list_books(State(state): State<AppState>) -> Json<Vec<Book>> {
    let books = state
        .query_log
        .timed("SELECT id, title, author_id FROM books", fetch(BOOKS.iter().cloned()))
        .await;
    Json(books)
}

/// List all authors with their books (one query per author)
pub async fn list_authors(State(state): State<AppState>) -> Json<Vec<AuthorWithBooks>> {
    let authors = state
        .query_log
        .timed("SELECT id, name FROM authors", fetch(AUTHORS.iter().cloned()))
        .await;

    let mut result = Vec::with_capacity(authors.len());
    for author in authors {
        let sql = format!("SELECT id, title, author_id FROM books WHERE author_id = {}", author.id);
        let books = state
            .query_log
            .timed(&sql, fetch(BOOKS.iter().filter(|book| book.author_id == author.id).cloned()))
            .await;
        result.push(AuthorWithBooks { author, books });
    }

    Json(result)
}
