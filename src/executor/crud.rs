use super::fetch_records;
use crate::model::{Record, ResourceModel, value};
use sea_orm::sea_query::{Alias, Condition, Expr, Query, SimpleExpr};
use sea_orm::{ConnectionTrait, DbErr, Value};
use serde_json::{Map, Value as JsonValue};

/// Coerce a JSON object to column values.
///
/// Returns the bound pairs in payload order and the names of fields whose
/// value does not fit the column type. Keys that are not columns are left
/// out; payload validation reports those.
#[must_use]
pub fn bind_payload(
    model: &ResourceModel,
    data: &Map<String, JsonValue>,
) -> (Vec<(String, Value)>, Vec<String>) {
    let mut bound = Vec::with_capacity(data.len());
    let mut invalid = Vec::new();
    for (key, json) in data {
        let Some(field) = model.column(key) else {
            continue;
        };
        match value::coerce_json(field.kind, json) {
            Some(value) => bound.push((key.clone(), value)),
            None => invalid.push(key.clone()),
        }
    }
    (bound, invalid)
}

fn pk_condition(model: &ResourceModel, id: Value) -> SimpleExpr {
    let table = Alias::new(model.table());
    Expr::col((table, Alias::new(&model.primary_key_field().name))).eq(id)
}

/// Coerce a path id to the primary key's type; `None` when it cannot match any row
#[must_use]
pub fn pk_value(model: &ResourceModel, id: &str) -> Option<Value> {
    value::coerce_str(model.primary_key_field().kind, id)
}

async fn select_where<C: ConnectionTrait>(
    db: &C,
    model: &ResourceModel,
    condition: Condition,
) -> Result<Option<Record>, DbErr> {
    let fields: Vec<_> = model.columns().iter().collect();
    let mut select = Query::select();
    for field in &fields {
        select.column((Alias::new(model.table()), Alias::new(&field.name)));
    }
    select
        .from(Alias::new(model.table()))
        .cond_where(condition)
        .limit(1);
    Ok(fetch_records(db, &select, &fields).await?.into_iter().next())
}

/// # Errors
/// Storage failures.
pub async fn find_by_pk<C: ConnectionTrait>(
    db: &C,
    model: &ResourceModel,
    id: &str,
) -> Result<Option<Record>, DbErr> {
    let Some(id) = pk_value(model, id) else {
        return Ok(None);
    };
    select_where(db, model, Condition::all().add(pk_condition(model, id))).await
}

/// First row whose columns equal every given value (`NULL` matches `IS NULL`)
///
/// # Errors
/// Storage failures.
pub async fn find_matching<C: ConnectionTrait>(
    db: &C,
    model: &ResourceModel,
    data: &[(String, Value)],
) -> Result<Option<Record>, DbErr> {
    let table = model.table();
    let condition = data.iter().fold(Condition::all(), |cond, (name, value)| {
        let col = Expr::col((Alias::new(table), Alias::new(name)));
        if value::is_null(value) {
            cond.add(col.is_null())
        } else {
            cond.add(col.eq(value.clone()))
        }
    });
    select_where(db, model, condition).await
}

/// Insert a row and read it back
///
/// # Errors
/// Storage failures, including integrity violations.
pub async fn insert<C: ConnectionTrait>(
    db: &C,
    model: &ResourceModel,
    data: &[(String, Value)],
) -> Result<Record, DbErr> {
    let backend = db.get_database_backend();
    let pk = &model.primary_key_field().name;

    let mut insert = Query::insert();
    insert.into_table(Alias::new(model.table()));
    if data.is_empty() {
        insert.or_default_values();
    } else {
        insert
            .columns(data.iter().map(|(name, _)| Alias::new(name)))
            .values(data.iter().map(|(_, v)| SimpleExpr::from(v.clone())))
            .map_err(|e| DbErr::Custom(e.to_string()))?;
    }

    if backend.support_returning() {
        insert.returning(
            Query::returning().columns(model.columns().iter().map(|f| Alias::new(&f.name))),
        );
        let stmt = backend.build(&insert);
        tracing::debug!(sql = %stmt.sql, "insert");
        let row = db
            .query_one(stmt)
            .await?
            .ok_or(DbErr::RecordNotInserted)?;
        let values = model
            .columns()
            .iter()
            .map(|field| Ok((field.name.clone(), value::decode(&row, field)?)))
            .collect::<Result<_, DbErr>>()?;
        return Ok(Record {
            values,
            ..Record::default()
        });
    }

    let stmt = backend.build(&insert);
    tracing::debug!(sql = %stmt.sql, "insert");
    let result = db.execute(stmt).await?;
    let id = data
        .iter()
        .find(|(name, _)| name == pk)
        .map(|(_, v)| v.clone())
        .unwrap_or_else(|| Value::from(i64::try_from(result.last_insert_id()).unwrap_or(i64::MAX)));
    select_where(db, model, Condition::all().add(pk_condition(model, id)))
        .await?
        .ok_or(DbErr::RecordNotInserted)
}

/// Update the row with primary key `id`; an empty change set is a no-op
///
/// # Errors
/// Storage failures, including integrity violations.
pub async fn update<C: ConnectionTrait>(
    db: &C,
    model: &ResourceModel,
    id: Value,
    data: &[(String, Value)],
) -> Result<(), DbErr> {
    if data.is_empty() {
        return Ok(());
    }
    let update = Query::update()
        .table(Alias::new(model.table()))
        .values(
            data.iter()
                .map(|(name, v)| (Alias::new(name), SimpleExpr::from(v.clone()))),
        )
        .and_where(pk_condition(model, id))
        .to_owned();
    let stmt = db.get_database_backend().build(&update);
    tracing::debug!(sql = %stmt.sql, "update");
    db.execute(stmt).await?;
    Ok(())
}

/// # Errors
/// Storage failures, including foreign keys still pointing at the row.
pub async fn delete<C: ConnectionTrait>(
    db: &C,
    model: &ResourceModel,
    id: Value,
) -> Result<u64, DbErr> {
    let delete = Query::delete()
        .from_table(Alias::new(model.table()))
        .and_where(pk_condition(model, id))
        .to_owned();
    let stmt = db.get_database_backend().build(&delete);
    tracing::debug!(sql = %stmt.sql, "delete");
    Ok(db.execute(stmt).await?.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Field, FieldKind};
    use serde_json::json;

    fn album() -> ResourceModel {
        ResourceModel::builder("Album", "album")
            .field(Field::new("AlbumId", FieldKind::Integer).primary_key().autoincrement())
            .field(Field::new("Title", FieldKind::String).not_null())
            .field(Field::new("ArtistId", FieldKind::Integer).not_null())
            .build()
            .unwrap()
    }

    #[test]
    fn payload_values_are_coerced_per_column() {
        let data = json!({"Title": "Let There Be Rock", "ArtistId": "x", "pippo": 1});
        let (bound, invalid) = bind_payload(&album(), data.as_object().unwrap());
        assert_eq!(
            bound,
            vec![(
                "Title".to_string(),
                Value::from("Let There Be Rock".to_string())
            )]
        );
        assert_eq!(invalid, vec!["ArtistId"]);
    }

    #[test]
    fn path_ids_follow_the_key_type() {
        assert_eq!(pk_value(&album(), "7"), Some(Value::from(7i64)));
        assert_eq!(pk_value(&album(), "seven"), None);
    }
}
