//! Query plan execution.
//!
//! Every function is generic over [`ConnectionTrait`] so the service can run
//! the same code on a pooled connection or inside a transaction.

pub mod crud;
pub(crate) mod statement;

pub use crud::{bind_payload, delete, find_by_pk, find_matching, insert, pk_value, update};

use crate::grammar::Grammar;
use crate::model::{Cardinality, Field, Record, Registry, Related, ResourceModel, value};
use crate::query::{Pagination, QueryPlan, RelatedLoad};
use sea_orm::sea_query::{Alias, Asterisk, Expr, Func, Query, SelectStatement};
use sea_orm::{ConnectionTrait, DbErr, QueryResult, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Upper bound of keys bound into one eager-loading `IN (...)`
const IN_CHUNK: usize = 500;

/// One page of root records and the totals it was cut from
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub records: Vec<Record>,
    pub pagination: Pagination,
}

pub(crate) async fn fetch_records<C: ConnectionTrait>(
    db: &C,
    select: &SelectStatement,
    fields: &[&Field],
) -> Result<Vec<Record>, DbErr> {
    let stmt = db.get_database_backend().build(select);
    tracing::debug!(sql = %stmt.sql, "select");
    db.query_all(stmt)
        .await?
        .iter()
        .map(|row| decode_row(row, fields))
        .collect()
}

fn decode_row(row: &QueryResult, fields: &[&Field]) -> Result<Record, DbErr> {
    let values = fields
        .iter()
        .map(|field| Ok((field.name.clone(), value::decode(row, field)?)))
        .collect::<Result<_, DbErr>>()?;
    Ok(Record {
        values,
        ..Record::default()
    })
}

/// Columns to load: the requested ones plus whatever links and relations need
fn load_columns<'a>(
    model: &'a ResourceModel,
    requested: &[String],
    extra: impl IntoIterator<Item = &'a str>,
) -> Vec<&'a Field> {
    if requested.is_empty() {
        return model.columns().iter().collect();
    }
    let pk = model.primary_key_field().name.as_str();
    let extra: Vec<&str> = extra.into_iter().collect();
    model
        .columns()
        .iter()
        .filter(|f| {
            f.name == pk || requested.contains(&f.name) || extra.contains(&f.name.as_str())
        })
        .collect()
}

fn select_columns(select: &mut SelectStatement, table: &str, fields: &[&Field]) {
    for field in fields {
        select.column((Alias::new(table), Alias::new(&field.name)));
    }
}

/// Run a plan: count the filtered rows, select one page, eager-load relations.
///
/// # Errors
/// Storage failures, or a plan naming relations the registry does not know.
pub async fn select_page<C: ConnectionTrait>(
    db: &C,
    registry: &Registry,
    model: &ResourceModel,
    plan: &QueryPlan,
) -> Result<Page, DbErr> {
    let query = &plan.query;
    let condition =
        statement::condition(registry, model, query, plan.join, &Grammar::default())?;

    let count = Query::select()
        .expr_as(Func::count(Expr::col(Asterisk)), Alias::new("num_items"))
        .from(Alias::new(model.table()))
        .cond_where(condition.clone())
        .to_owned();
    let total = match db.query_one(db.get_database_backend().build(&count)).await? {
        Some(row) => row.try_get::<i64>("", "num_items")?,
        None => 0,
    };
    let pagination = Pagination::new(plan.page, plan.limit, u64::try_from(total).unwrap_or(0));

    let local_keys = query.related.iter().filter_map(|load| {
        model
            .related(&load.relation)
            .map(|relation| relation.local_key.as_str())
    });
    let fields = load_columns(model, &query.fields, local_keys);

    let mut select = Query::select();
    select_columns(&mut select, model.table(), &fields);
    select.from(Alias::new(model.table())).cond_where(condition);
    statement::order(&mut select, registry, model, &query.orders)?;
    if plan.limit.is_some() {
        select
            .limit(pagination.page_size)
            .offset(pagination.offset());
    }

    let mut records = fetch_records(db, &select, &fields).await?;
    if !query.fields.is_empty() {
        let projection: Arc<[String]> = query.fields.clone().into();
        for record in &mut records {
            record.projection = Some(Arc::clone(&projection));
        }
    }

    for load in &query.related {
        load_related(db, registry, model, &mut records, load).await?;
    }

    Ok(Page {
        records,
        pagination,
    })
}

/// Eager-load one relation for a batch of records with `IN` queries
///
/// # Errors
/// Storage failures or an unknown relation.
pub async fn load_related<C: ConnectionTrait>(
    db: &C,
    registry: &Registry,
    model: &ResourceModel,
    records: &mut [Record],
    load: &RelatedLoad,
) -> Result<(), DbErr> {
    let (relation, target) = statement::relation_target(registry, model, &load.relation)?;

    let mut keys: Vec<Value> = Vec::new();
    let mut seen: Vec<String> = Vec::new();
    for record in records.iter() {
        if let (Some(key), Some(value)) = (
            record.key_string(&relation.local_key),
            record.get(&relation.local_key),
        ) {
            if !seen.contains(&key) {
                seen.push(key);
                keys.push(value.clone());
            }
        }
    }

    let requested = load.columns.clone().unwrap_or_default();
    let fields = load_columns(target, &requested, [relation.remote_key.as_str()]);
    let projection: Option<Arc<[String]>> = load.columns.clone().map(Into::into);

    let mut grouped: HashMap<String, Vec<Record>> = HashMap::new();
    for chunk in keys.chunks(IN_CHUNK) {
        let mut select = Query::select();
        select_columns(&mut select, target.table(), &fields);
        select
            .from(Alias::new(target.table()))
            .and_where(
                Expr::col((Alias::new(target.table()), Alias::new(&relation.remote_key)))
                    .is_in(chunk.iter().cloned()),
            )
            .order_by(
                (
                    Alias::new(target.table()),
                    Alias::new(&target.primary_key_field().name),
                ),
                sea_orm::sea_query::Order::Asc,
            );
        for mut row in fetch_records(db, &select, &fields).await? {
            row.projection.clone_from(&projection);
            if let Some(key) = row.key_string(&relation.remote_key) {
                grouped.entry(key).or_default().push(row);
            }
        }
    }

    for record in records.iter_mut() {
        let rows = record
            .key_string(&relation.local_key)
            .and_then(|key| grouped.get(&key))
            .cloned()
            .unwrap_or_default();
        let related = match relation.cardinality {
            Cardinality::Scalar => Related::One(rows.into_iter().next().map(Box::new)),
            Cardinality::Collection => Related::Many(rows),
        };
        record.related.push((relation.name.clone(), related));
    }

    tracing::debug!(
        resource = %model.name(),
        relation = %relation.name,
        keys = keys.len(),
        "Loaded related rows"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FieldKind;

    #[test]
    fn projection_keeps_keys_needed_for_links_and_relations() {
        let model = ResourceModel::builder("Album", "album")
            .field(Field::new("AlbumId", FieldKind::Integer).primary_key().autoincrement())
            .field(Field::new("Title", FieldKind::String).not_null())
            .field(Field::new("ArtistId", FieldKind::Integer).not_null())
            .build()
            .unwrap();
        let requested = ["Title".to_string()];
        let names: Vec<_> = load_columns(&model, &requested, ["ArtistId"])
            .iter()
            .map(|f| f.name.as_str())
            .collect();
        assert_eq!(names, vec!["AlbumId", "Title", "ArtistId"]);

        assert_eq!(load_columns(&model, &[], []).len(), 3);
    }
}
