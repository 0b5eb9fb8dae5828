//! Book Repository (read side used by checkout)

use super::{RepoResult, parse_decimal};
use shared::models::Book;
use sqlx::{SqliteConnection, SqlitePool};

#[derive(sqlx::FromRow)]
struct BookRow {
    id: String,
    title: String,
    price: String,
    active: bool,
    updated_at: i64,
}

impl BookRow {
    fn into_model(self) -> RepoResult<Book> {
        Ok(Book {
            price: parse_decimal(&self.price, "books.price")?,
            id: self.id,
            title: self.title,
            active: self.active,
            updated_at: self.updated_at,
        })
    }
}

pub async fn find_by_id(pool: &SqlitePool, id: &str) -> RepoResult<Option<Book>> {
    let row = sqlx::query_as::<_, BookRow>(
        "SELECT id, title, price, active, updated_at FROM books WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    row.map(BookRow::into_model).transpose()
}

/// Fresh prices for a set of books (missing ids are simply absent)
pub async fn find_many(conn: &mut SqliteConnection, ids: &[String]) -> RepoResult<Vec<Book>> {
    let mut books = Vec::with_capacity(ids.len());
    for id in ids {
        let row = sqlx::query_as::<_, BookRow>(
            "SELECT id, title, price, active, updated_at FROM books WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
        if let Some(row) = row {
            books.push(row.into_model()?);
        }
    }
    Ok(books)
}

/// Insert or replace a catalog entry (catalog CRUD lives elsewhere; used by
/// seeding and tests)
pub async fn upsert(pool: &SqlitePool, book: &Book) -> RepoResult<()> {
    sqlx::query(
        "INSERT INTO books (id, title, price, active, updated_at) VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT (id) DO UPDATE SET title = ?2, price = ?3, active = ?4, updated_at = ?5",
    )
    .bind(&book.id)
    .bind(&book.title)
    .bind(book.price.to_string())
    .bind(book.active)
    .bind(book.updated_at)
    .execute(pool)
    .await?;
    Ok(())
}
