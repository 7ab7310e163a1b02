#![allow(dead_code)]

use autocrud::{AutoCrud, AutoCrudConfig};
use axum::Router;
use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use sea_orm::{ConnectionTrait, Database, DatabaseConnection, DbErr};
use sea_orm_migration::prelude::*;
use serde_json::Value as JsonValue;
use tower::ServiceExt;

pub async fn setup_test_db() -> Result<DatabaseConnection, DbErr> {
    let db = Database::connect("sqlite::memory:").await?;
    Migrator::up(&db, None).await?;
    Ok(db)
}

pub async fn setup_app_with(config: AutoCrudConfig) -> Router {
    let db = setup_test_db()
        .await
        .expect("Failed to setup test database");
    AutoCrud::from_database(db, config)
        .await
        .expect("Failed to reflect test database")
        .router()
}

pub async fn setup_test_app() -> Router {
    setup_app_with(AutoCrudConfig::default()).await
}

/// Response parts of one request
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl TestResponse {
    pub fn json(&self) -> JsonValue {
        serde_json::from_slice(&self.body).unwrap_or_else(|e| {
            panic!(
                "body is not JSON ({e}): {}",
                String::from_utf8_lossy(&self.body)
            )
        })
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

pub async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    body: Option<JsonValue>,
    headers: &[(&str, &str)],
) -> TestResponse {
    let mut builder = Request::builder().method(method).uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let body = match body {
        Some(json) => {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_string(&json).unwrap())
        }
        None => Body::empty(),
    };
    let response = app
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec();
    TestResponse {
        status,
        headers,
        body,
    }
}

pub async fn get(app: &Router, uri: &str) -> TestResponse {
    send(app, "GET", uri, None, &[]).await
}

/// Percent-encode a query value
pub fn qs(value: &str) -> String {
    url_escape::encode_component(value).to_string()
}

/// Values of `field` across the items of a list body
pub fn column(body: &JsonValue, list_key: &str, field: &str) -> Vec<JsonValue> {
    body[list_key]
        .as_array()
        .unwrap_or_else(|| panic!("no '{list_key}' in {body}"))
        .iter()
        .map(|item| item[field].clone())
        .collect()
}

// ============================================================================
// Schema: a slice of the Chinook sample database
// ============================================================================

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![Box::new(CreateChinookTables)]
    }
}

pub struct CreateChinookTables;

#[async_trait::async_trait]
impl MigrationName for CreateChinookTables {
    fn name(&self) -> &'static str {
        "m20240101_000001_create_chinook_tables"
    }
}

const SEED: &[&str] = &[
    r#"INSERT INTO "artist" ("ArtistId", "Name") VALUES
        (1, 'AC/DC'), (2, 'Accept'), (3, 'Aerosmith'),
        (4, 'Alanis Morissette'), (5, 'Alice In Chains'), (6, 'Apocalyptica')"#,
    r#"INSERT INTO "album" ("AlbumId", "Title", "ArtistId") VALUES
        (1, 'For Those About To Rock We Salute You', 1),
        (2, 'Balls to the Wall', 2),
        (3, 'Restless and Wild', 2),
        (4, 'Let There Be Rock', 1),
        (5, 'Big Ones', 3)"#,
    r#"INSERT INTO "track" ("TrackId", "Name", "AlbumId", "Composer", "Milliseconds", "UnitPrice") VALUES
        (1, 'For Those About To Rock (We Salute You)', 1, 'Angus Young, Malcolm Young, Brian Johnson', 343719, 0.99),
        (2, 'Balls to the Wall', 2, NULL, 342562, 0.99),
        (3, 'Fast As a Shark', 3, 'F. Baltes, S. Kaufman, U. Dirkscneider & W. Hoffman', 230619, 0.99),
        (4, 'Restless and Wild', 3, 'F. Baltes, R.A. Smith-Diesel, S. Kaufman, U. Dirkscneider & W. Hoffman', 252051, 0.99),
        (5, 'Go Down', 4, 'AC/DC', 331180, 0.99),
        (6, 'Walk On Water', 5, 'Steven Tyler, Joe Perry, Jack Blades, Tommy Shaw', 295680, 1.99),
        (7, 'Orphan Jam', NULL, NULL, 200000, 0.49)"#,
];

fn id_column(name: &str) -> ColumnDef {
    ColumnDef::new(Alias::new(name))
        .integer()
        .not_null()
        .auto_increment()
        .primary_key()
        .to_owned()
}

#[async_trait::async_trait]
impl MigrationTrait for CreateChinookTables {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Alias::new("artist"))
                    .if_not_exists()
                    .col(id_column("ArtistId"))
                    .col(ColumnDef::new(Alias::new("Name")).string_len(120).null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Alias::new("album"))
                    .if_not_exists()
                    .col(id_column("AlbumId"))
                    .col(ColumnDef::new(Alias::new("Title")).string_len(160).not_null())
                    .col(ColumnDef::new(Alias::new("ArtistId")).integer().not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_album_artist")
                            .from(Alias::new("album"), Alias::new("ArtistId"))
                            .to(Alias::new("artist"), Alias::new("ArtistId")),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Alias::new("track"))
                    .if_not_exists()
                    .col(id_column("TrackId"))
                    .col(ColumnDef::new(Alias::new("Name")).string_len(200).not_null())
                    .col(ColumnDef::new(Alias::new("AlbumId")).integer().null())
                    .col(ColumnDef::new(Alias::new("Composer")).string_len(220).null())
                    .col(ColumnDef::new(Alias::new("Milliseconds")).integer().not_null())
                    .col(ColumnDef::new(Alias::new("UnitPrice")).double().not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_track_album")
                            .from(Alias::new("track"), Alias::new("AlbumId"))
                            .to(Alias::new("album"), Alias::new("AlbumId")),
                    )
                    .to_owned(),
            )
            .await?;

        let db = manager.get_connection();
        for statement in SEED {
            db.execute_unprepared(statement).await?;
        }
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        for table in ["track", "album", "artist"] {
            manager
                .drop_table(Table::drop().table(Alias::new(table)).to_owned())
                .await?;
        }
        Ok(())
    }
}
