//! Destination catalog management.
//!
//! The catalog maps checkout metadata slugs to the display names used in
//! order rows and confirmation emails. Unknown slugs still fulfill (the
//! server falls back to prettifying the slug), so seeding here is about
//! presentation quality, not correctness.

use super::{CommandError, connect};

/// Add a destination, or update its display name if the slug exists.
///
/// # Errors
///
/// Returns an error if the database is unreachable or the upsert fails.
pub async fn add(slug: &str, name: &str) -> Result<(), CommandError> {
    let pool = connect().await?;

    sqlx::query(
        r"
        INSERT INTO destination (slug, display_name)
        VALUES ($1, $2)
        ON CONFLICT (slug) DO UPDATE SET display_name = EXCLUDED.display_name
        ",
    )
    .bind(slug)
    .bind(name)
    .execute(&pool)
    .await?;

    tracing::info!(slug, name, "Destination saved");
    Ok(())
}

/// Print the destination catalog.
///
/// # Errors
///
/// Returns an error if the database is unreachable or the query fails.
pub async fn list() -> Result<(), CommandError> {
    let pool = connect().await?;

    let rows: Vec<(String, String)> =
        sqlx::query_as("SELECT slug, display_name FROM destination ORDER BY slug")
            .fetch_all(&pool)
            .await?;

    #[allow(clippy::print_stdout)]
    {
        println!("{} destinations:", rows.len());
        for (slug, name) in rows {
            println!("  {slug:<24} {name}");
        }
    }

    Ok(())
}
