//! # autocrud
//!
//! Expose the tables of a relational database as REST resources on an
//! [`axum`] router, backed by [`sea_orm`].
//!
//! Every resource answers list, read, create, replace, update, delete and a
//! structured `FETCH` query. Lists are filtered, sorted, projected and
//! expanded through a small query-string grammar:
//!
//! ```text
//! GET /artist?Name=%25AC%25&_sort=-ArtistId&_related=Album&_page=2&_limit=10
//! GET /track?Milliseconds=(200000;300000)&GenreId=!1;2
//! GET /album?Artist.Name=AC/DC&_fields=Title
//! ```
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use autocrud::{AutoCrud, AutoCrudConfig};
//!
//! let db = sea_orm::Database::connect("sqlite://chinook.db").await?;
//! let app = AutoCrud::from_database(db, AutoCrudConfig::default()).await?;
//! let router = app.router();
//! ```
//!
//! Models may also be declared by hand with [`ResourceModel::builder`] and
//! collected into a [`Registry`].

pub mod config;
pub mod errors;
pub mod executor;
pub mod grammar;
pub mod model;
pub mod openapi;
pub mod query;
pub mod response;
pub mod routes;
pub mod service;
pub mod verb;

pub use config::{AutoCrudConfig, JoinKind};
pub use errors::{ApiError, ConfigError};
pub use grammar::{Arguments, Grammar};
pub use model::{
    Cardinality, Field, FieldKind, Record, Registry, Relationship, ResourceModel,
};
pub use query::{FetchPayload, ParsedQuery, Qs2Sqla, QueryPlan};
pub use response::Reply;
pub use routes::AutoCrud;
pub use service::ResourceService;
pub use verb::Verb;
