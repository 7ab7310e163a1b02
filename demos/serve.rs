//! Serve every table of a database as REST resources
//!
//! ```bash
//! DATABASE_URL=sqlite://chinook.db cargo run --example serve
//! ```
//!
//! Without `DATABASE_URL` a small in-memory catalog is created. Then visit:
//! - **Resources**: <http://localhost:3000/resources>
//! - **Artists**: <http://localhost:3000/artist?_related=Album&_limit=5>
//! - **Description**: <http://localhost:3000/artist/meta>
//!
//! Every `AUTOCRUD_*` variable (e.g. `AUTOCRUD_READ_ONLY=true`) is honored.

use autocrud::{AutoCrud, AutoCrudConfig};
use sea_orm::{ConnectionTrait, Database};
use std::env;
use tracing_subscriber::EnvFilter;

const DEMO_SCHEMA: &[&str] = &[
    r#"CREATE TABLE "artist" ("ArtistId" INTEGER PRIMARY KEY, "Name" VARCHAR(120))"#,
    r#"CREATE TABLE "album" (
        "AlbumId" INTEGER PRIMARY KEY,
        "Title" VARCHAR(160) NOT NULL,
        "ArtistId" INTEGER NOT NULL REFERENCES "artist" ("ArtistId")
    )"#,
    r#"INSERT INTO "artist" ("Name") VALUES ('AC/DC'), ('Accept'), ('Aerosmith')"#,
    r#"INSERT INTO "album" ("Title", "ArtistId") VALUES
        ('For Those About To Rock We Salute You', 1),
        ('Balls to the Wall', 2),
        ('Restless and Wild', 2),
        ('Let There Be Rock', 1),
        ('Big Ones', 3)"#,
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("autocrud=info")),
        )
        .with_target(false)
        .compact()
        .init();

    let database_url = env::var("DATABASE_URL").ok();
    let db = Database::connect(database_url.as_deref().unwrap_or("sqlite::memory:")).await?;
    if database_url.is_none() {
        for statement in DEMO_SCHEMA {
            db.execute_unprepared(statement).await?;
        }
    }

    let config = AutoCrudConfig::from_env();
    let app = AutoCrud::from_database(db, config).await?;
    tracing::info!(resources = app.registry().len(), "Reflected database");

    let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
    tracing::info!("Listening on http://0.0.0.0:3000");
    axum::serve(listener, app.router()).await?;
    Ok(())
}
