//! Schema reflection.
//!
//! A [`SchemaReflector`] reads table, column and foreign-key definitions from
//! a live connection. The registry turns the resulting [`TableDef`]s into
//! resource models and relations.

use super::{Field, FieldKind};
use crate::errors::ConfigError;
use async_trait::async_trait;
use sea_orm::{ConnectionTrait, DatabaseConnection, DbBackend, QueryResult, Statement, Value};
use std::collections::{HashMap, HashSet};

/// Bookkeeping table written by `sea-orm-migration`
const MIGRATIONS_TABLE: &str = "seaql_migrations";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDef {
    pub name: String,
    pub comment: Option<String>,
    pub columns: Vec<Field>,
    pub foreign_keys: Vec<ForeignKey>,
}

/// A single-column foreign key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKey {
    pub column: String,
    pub target_table: String,
    /// `None` when the key references the target's primary key implicitly
    pub target_column: Option<String>,
}

#[async_trait]
pub trait SchemaReflector: Send + Sync {
    /// Every user table in `schema` (or the default schema)
    async fn tables(
        &self,
        db: &DatabaseConnection,
        schema: Option<&str>,
    ) -> Result<Vec<TableDef>, ConfigError>;
}

/// Pick the reflector for the connection's backend
///
/// # Errors
/// [`ConfigError::UnsupportedBackend`] for backends without a reflector.
pub fn reflector_for(backend: DbBackend) -> Result<Box<dyn SchemaReflector>, ConfigError> {
    match backend {
        DbBackend::Sqlite => Ok(Box::new(SqliteReflector)),
        DbBackend::Postgres => Ok(Box::new(PostgresReflector)),
        other => Err(ConfigError::UnsupportedBackend(format!("{other:?}"))),
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

async fn query(
    db: &DatabaseConnection,
    sql: String,
    values: Vec<Value>,
) -> Result<Vec<QueryResult>, ConfigError> {
    let backend = db.get_database_backend();
    Ok(db
        .query_all(Statement::from_sql_and_values(backend, sql, values))
        .await?)
}

// ============================================================================
// SQLite
// ============================================================================

pub struct SqliteReflector;

impl SqliteReflector {
    async fn unique_columns(
        db: &DatabaseConnection,
        table: &str,
    ) -> Result<HashSet<String>, ConfigError> {
        let mut unique = HashSet::new();
        let indexes = query(db, format!("PRAGMA index_list({})", quote_ident(table)), vec![]).await?;
        for index in indexes {
            let is_unique: i64 = index.try_get("", "unique").map_err(ConfigError::from)?;
            let origin: String = index.try_get("", "origin").map_err(ConfigError::from)?;
            if is_unique == 0 || origin == "pk" {
                continue;
            }
            let name: String = index.try_get("", "name").map_err(ConfigError::from)?;
            let columns = query(db, format!("PRAGMA index_info({})", quote_ident(&name)), vec![]).await?;
            if let [column] = columns.as_slice() {
                let column: String = column.try_get("", "name").map_err(ConfigError::from)?;
                unique.insert(column);
            }
        }
        Ok(unique)
    }

    async fn foreign_keys(
        db: &DatabaseConnection,
        table: &str,
    ) -> Result<Vec<ForeignKey>, ConfigError> {
        let rows = query(
            db,
            format!("PRAGMA foreign_key_list({})", quote_ident(table)),
            vec![],
        )
        .await?;

        let mut by_id: HashMap<i64, Vec<ForeignKey>> = HashMap::new();
        let mut order = Vec::new();
        for row in rows {
            let id: i64 = row.try_get("", "id").map_err(ConfigError::from)?;
            let key = ForeignKey {
                column: row.try_get("", "from").map_err(ConfigError::from)?,
                target_table: row.try_get("", "table").map_err(ConfigError::from)?,
                target_column: row.try_get("", "to").map_err(ConfigError::from)?,
            };
            if !by_id.contains_key(&id) {
                order.push(id);
            }
            by_id.entry(id).or_default().push(key);
        }

        // composite keys have no single-column relation to expose
        Ok(order
            .into_iter()
            .filter_map(|id| by_id.remove(&id))
            .filter(|keys| keys.len() == 1)
            .flatten()
            .collect())
    }
}

#[async_trait]
impl SchemaReflector for SqliteReflector {
    async fn tables(
        &self,
        db: &DatabaseConnection,
        _schema: Option<&str>,
    ) -> Result<Vec<TableDef>, ConfigError> {
        let names = query(
            db,
            "SELECT name FROM sqlite_master WHERE type = 'table' \
             AND name NOT LIKE 'sqlite_%' ORDER BY name"
                .to_string(),
            vec![],
        )
        .await?;

        let mut tables = Vec::new();
        for row in names {
            let name: String = row.try_get("", "name").map_err(ConfigError::from)?;
            if name == MIGRATIONS_TABLE {
                continue;
            }

            let unique = Self::unique_columns(db, &name).await?;
            let info = query(db, format!("PRAGMA table_info({})", quote_ident(&name)), vec![]).await?;
            let pk_count = info
                .iter()
                .filter(|c| c.try_get::<i64>("", "pk").is_ok_and(|pk| pk > 0))
                .count();

            let mut columns = Vec::with_capacity(info.len());
            for column in &info {
                let column_name: String = column.try_get("", "name").map_err(ConfigError::from)?;
                let sql_type: String = column.try_get("", "type").map_err(ConfigError::from)?;
                let not_null: i64 = column.try_get("", "notnull").map_err(ConfigError::from)?;
                let pk: i64 = column.try_get("", "pk").map_err(ConfigError::from)?;
                let default: Option<String> =
                    column.try_get("", "dflt_value").map_err(ConfigError::from)?;

                let mut field = Field::new(&column_name, FieldKind::from_sql_type(&sql_type))
                    .sql_type(&sql_type);
                if pk > 0 {
                    field = field.primary_key();
                    // a lone INTEGER PRIMARY KEY aliases the rowid
                    if pk_count == 1 && sql_type.eq_ignore_ascii_case("INTEGER") {
                        field = field.autoincrement();
                    }
                }
                if not_null != 0 {
                    field = field.not_null();
                }
                if default.is_some() {
                    field = field.with_default();
                }
                if unique.contains(&column_name) {
                    field = field.unique();
                }
                columns.push(field);
            }

            tables.push(TableDef {
                foreign_keys: Self::foreign_keys(db, &name).await?,
                name,
                comment: None,
                columns,
            });
        }
        Ok(tables)
    }
}

// ============================================================================
// PostgreSQL
// ============================================================================

pub struct PostgresReflector;

impl PostgresReflector {
    async fn constraint_columns(
        db: &DatabaseConnection,
        schema: &str,
        table: &str,
        kind: &str,
    ) -> Result<Vec<(String, String)>, ConfigError> {
        let rows = query(
            db,
            "SELECT tc.constraint_name::text AS constraint_name, kcu.column_name::text AS column_name \
             FROM information_schema.table_constraints tc \
             JOIN information_schema.key_column_usage kcu \
               ON tc.constraint_name = kcu.constraint_name AND tc.table_schema = kcu.table_schema \
             WHERE tc.constraint_type = $1 AND tc.table_schema = $2 AND tc.table_name = $3 \
             ORDER BY kcu.ordinal_position"
                .to_string(),
            vec![kind.into(), schema.into(), table.into()],
        )
        .await?;
        rows.iter()
            .map(|row| {
                Ok((
                    row.try_get("", "constraint_name")?,
                    row.try_get("", "column_name")?,
                ))
            })
            .collect::<Result<_, sea_orm::DbErr>>()
            .map_err(ConfigError::from)
    }

    async fn foreign_keys(
        db: &DatabaseConnection,
        schema: &str,
        table: &str,
    ) -> Result<Vec<ForeignKey>, ConfigError> {
        let rows = query(
            db,
            "SELECT tc.constraint_name::text AS constraint_name, \
                    kcu.column_name::text AS column_name, \
                    ccu.table_name::text AS target_table, \
                    ccu.column_name::text AS target_column \
             FROM information_schema.table_constraints tc \
             JOIN information_schema.key_column_usage kcu \
               ON tc.constraint_name = kcu.constraint_name AND tc.table_schema = kcu.table_schema \
             JOIN information_schema.constraint_column_usage ccu \
               ON ccu.constraint_name = tc.constraint_name AND ccu.table_schema = tc.table_schema \
             WHERE tc.constraint_type = 'FOREIGN KEY' AND tc.table_schema = $1 AND tc.table_name = $2"
                .to_string(),
            vec![schema.into(), table.into()],
        )
        .await?;

        let mut by_name: HashMap<String, Vec<ForeignKey>> = HashMap::new();
        let mut order = Vec::new();
        for row in rows {
            let name: String = row.try_get("", "constraint_name").map_err(ConfigError::from)?;
            let key = ForeignKey {
                column: row.try_get("", "column_name").map_err(ConfigError::from)?,
                target_table: row.try_get("", "target_table").map_err(ConfigError::from)?,
                target_column: Some(row.try_get("", "target_column").map_err(ConfigError::from)?),
            };
            if !by_name.contains_key(&name) {
                order.push(name.clone());
            }
            by_name.entry(name).or_default().push(key);
        }
        Ok(order
            .into_iter()
            .filter_map(|name| by_name.remove(&name))
            .filter(|keys| keys.len() == 1)
            .flatten()
            .collect())
    }
}

#[async_trait]
impl SchemaReflector for PostgresReflector {
    async fn tables(
        &self,
        db: &DatabaseConnection,
        schema: Option<&str>,
    ) -> Result<Vec<TableDef>, ConfigError> {
        let schema = schema.unwrap_or("public");
        let names = query(
            db,
            "SELECT table_name::text AS table_name, \
                    obj_description(format('%I.%I', table_schema, table_name)::regclass, 'pg_class') AS comment \
             FROM information_schema.tables \
             WHERE table_schema = $1 AND table_type = 'BASE TABLE' ORDER BY table_name"
                .to_string(),
            vec![schema.into()],
        )
        .await?;

        let mut tables = Vec::new();
        for row in names {
            let name: String = row.try_get("", "table_name").map_err(ConfigError::from)?;
            if name == MIGRATIONS_TABLE {
                continue;
            }
            let comment: Option<String> = row.try_get("", "comment").map_err(ConfigError::from)?;

            let primary: HashSet<String> =
                Self::constraint_columns(db, schema, &name, "PRIMARY KEY")
                    .await?
                    .into_iter()
                    .map(|(_, column)| column)
                    .collect();
            let mut unique_counts: HashMap<String, Vec<String>> = HashMap::new();
            for (constraint, column) in
                Self::constraint_columns(db, schema, &name, "UNIQUE").await?
            {
                unique_counts.entry(constraint).or_default().push(column);
            }
            let unique: HashSet<String> = unique_counts
                .into_values()
                .filter(|columns| columns.len() == 1)
                .flatten()
                .collect();

            let info = query(
                db,
                "SELECT c.column_name::text AS column_name, c.data_type::text AS data_type, \
                        c.is_nullable::text AS is_nullable, c.column_default::text AS column_default, \
                        c.is_identity::text AS is_identity, \
                        col_description(format('%I.%I', c.table_schema, c.table_name)::regclass, \
                                        c.ordinal_position::int) AS comment \
                 FROM information_schema.columns c \
                 WHERE c.table_schema = $1 AND c.table_name = $2 ORDER BY c.ordinal_position"
                    .to_string(),
                vec![schema.into(), name.as_str().into()],
            )
            .await?;

            let mut columns = Vec::with_capacity(info.len());
            for column in &info {
                let column_name: String =
                    column.try_get("", "column_name").map_err(ConfigError::from)?;
                let sql_type: String = column.try_get("", "data_type").map_err(ConfigError::from)?;
                let nullable: String = column.try_get("", "is_nullable").map_err(ConfigError::from)?;
                let default: Option<String> =
                    column.try_get("", "column_default").map_err(ConfigError::from)?;
                let identity: String = column.try_get("", "is_identity").map_err(ConfigError::from)?;
                let comment: Option<String> =
                    column.try_get("", "comment").map_err(ConfigError::from)?;

                let serial = default.as_deref().is_some_and(|d| d.starts_with("nextval("));
                let mut field = Field::new(&column_name, FieldKind::from_sql_type(&sql_type))
                    .sql_type(&sql_type);
                if primary.contains(&column_name) {
                    field = field.primary_key();
                    if serial || identity == "YES" {
                        field = field.autoincrement();
                    }
                }
                if nullable == "NO" {
                    field = field.not_null();
                }
                if default.is_some() || identity == "YES" {
                    field = field.with_default();
                }
                if unique.contains(&column_name) {
                    field = field.unique();
                }
                if let Some(comment) = comment {
                    field = field.comment(comment);
                }
                columns.push(field);
            }

            tables.push(TableDef {
                foreign_keys: Self::foreign_keys(db, schema, &name).await?,
                name,
                comment,
                columns,
            });
        }
        Ok(tables)
    }
}
