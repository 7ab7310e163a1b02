use super::qs::Qs2Sqla;
use super::{FilterClause, Operator, ParsedQuery, Predicate, RelatedLoad, SortDirective};
use crate::model::value::coerce_json;
use crate::model::{Field, FieldKind};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use utoipa::ToSchema;

/// Body of a FETCH request
#[derive(Debug, Clone, Default, Deserialize, Serialize, ToSchema)]
#[serde(default, deny_unknown_fields)]
pub struct FetchPayload {
    /// Root columns to return
    pub fields: Vec<String>,
    /// Relation name to `"*"` or a list of target columns
    pub related: BTreeMap<String, RelatedColumns>,
    pub filters: Vec<FilterSpec>,
    pub sorting: Vec<SortSpec>,
    pub pagination: Option<PaginationSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, ToSchema)]
#[serde(untagged)]
pub enum RelatedColumns {
    Wildcard(String),
    Columns(Vec<String>),
}

#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct FilterSpec {
    /// Resource or relation name; the requested resource when absent
    pub model: Option<String>,
    pub field: String,
    pub op: String,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub value: JsonValue,
}

#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct SortSpec {
    pub model: Option<String>,
    pub field: String,
    #[serde(default = "default_direction")]
    pub direction: String,
}

fn default_direction() -> String {
    "asc".to_string()
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct PaginationSpec {
    pub page: Option<u64>,
    pub limit: Option<u64>,
}

impl PaginationSpec {
    /// The same bounds expressed as `_page`/`_limit` arguments
    #[must_use]
    pub fn to_args(self, page_arg: &str, limit_arg: &str) -> Vec<(String, String)> {
        let mut args = Vec::new();
        if let Some(page) = self.page {
            args.push((page_arg.to_string(), page.to_string()));
        }
        if let Some(limit) = self.limit {
            args.push((limit_arg.to_string(), limit.to_string()));
        }
        args
    }
}

impl Qs2Sqla<'_> {
    /// Resolve `model` to `None` (this resource) or a relation name
    fn resolve_model(&self, model: Option<&str>) -> Option<Option<String>> {
        match model {
            None => Some(None),
            Some(name) if name.eq_ignore_ascii_case(self.model.name()) => Some(None),
            Some(name) => self.model.related(name).map(|r| Some(r.name.clone())),
        }
    }

    fn field_of(&self, relation: Option<&str>, field: &str) -> Option<&Field> {
        match relation {
            None => self.model.column(field),
            Some(name) => {
                let relation = self.model.related(name)?;
                self.registry.get(&relation.target)?.column(field)
            }
        }
    }

    /// Compile a FETCH payload.
    ///
    /// Each filter and sort entry is checked part by part; a part that does
    /// not resolve is reported as `model`, `field`, `op` or `direction`
    /// prefixed onto the offending token (e.g. `op=approx`).
    #[must_use]
    pub fn dict2sqla(&self, payload: &FetchPayload) -> (ParsedQuery, Vec<String>) {
        let mut query = ParsedQuery::default();
        let mut invalid = Vec::new();

        for name in &payload.fields {
            if self.model.column(name).is_some() {
                query.fields.push(name.clone());
            } else {
                invalid.push(name.clone());
            }
        }

        for (name, columns) in &payload.related {
            let Some(relation) = self.model.related(name) else {
                invalid.push(name.clone());
                continue;
            };
            let columns = match columns {
                RelatedColumns::Wildcard(w) if w == "*" => None,
                RelatedColumns::Wildcard(other) => {
                    invalid.push(format!("{name}.{other}"));
                    continue;
                }
                RelatedColumns::Columns(columns) => {
                    let Some(target) = self.registry.get(&relation.target) else {
                        invalid.push(name.clone());
                        continue;
                    };
                    let unknown: Vec<_> = columns
                        .iter()
                        .filter(|c| target.column(c).is_none())
                        .map(|c| format!("{name}.{c}"))
                        .collect();
                    if !unknown.is_empty() {
                        invalid.extend(unknown);
                        continue;
                    }
                    Some(columns.clone())
                }
            };
            query.related.push(RelatedLoad {
                relation: relation.name.clone(),
                columns,
            });
        }

        for spec in &payload.filters {
            let Some(relation) = self.resolve_model(spec.model.as_deref()) else {
                invalid.push(format!("model={}", spec.model.as_deref().unwrap_or_default()));
                continue;
            };
            let Some(field) = self.field_of(relation.as_deref(), &spec.field) else {
                invalid.push(format!("field={}", spec.field));
                continue;
            };
            let Ok(op) = spec.op.parse::<Operator>() else {
                invalid.push(format!("op={}", spec.op));
                continue;
            };
            match predicate(field.kind, op, &spec.value) {
                Some(predicate) => query.filters.push(FilterClause {
                    relation,
                    field: field.name.clone(),
                    alternatives: vec![predicate],
                }),
                None => invalid.push(format!("{}={}", spec.field, spec.value)),
            }
        }

        for spec in &payload.sorting {
            let Some(relation) = self.resolve_model(spec.model.as_deref()) else {
                invalid.push(format!("model={}", spec.model.as_deref().unwrap_or_default()));
                continue;
            };
            let Some(field) = self.field_of(relation.as_deref(), &spec.field) else {
                invalid.push(format!("field={}", spec.field));
                continue;
            };
            let descending = match spec.direction.to_ascii_lowercase().as_str() {
                "asc" => false,
                "desc" => true,
                _ => {
                    invalid.push(format!("direction={}", spec.direction));
                    continue;
                }
            };
            query.orders.push(SortDirective {
                relation,
                field: field.name.clone(),
                descending,
            });
        }

        if !invalid.is_empty() {
            tracing::debug!(resource = %self.model.name(), ?invalid, "Rejected FETCH payload parts");
        }
        (query, invalid)
    }
}

fn predicate(kind: FieldKind, op: Operator, value: &JsonValue) -> Option<Predicate> {
    let coerce = |v: &JsonValue| coerce_json(kind, v);
    let list = || -> Option<Vec<_>> { value.as_array()?.iter().map(coerce).collect() };

    Some(match op {
        Operator::Eq | Operator::Ne if value.is_null() => Predicate::Null {
            negated: op == Operator::Ne,
        },
        Operator::Eq | Operator::Ne | Operator::Gt | Operator::Ge | Operator::Lt | Operator::Le => {
            Predicate::Compare(op, coerce(value)?)
        }
        Operator::Like | Operator::NotLike => Predicate::Like {
            pattern: value.as_str()?.to_string(),
            negated: op == Operator::NotLike,
        },
        Operator::In | Operator::NotIn => Predicate::In {
            values: list()?,
            negated: op == Operator::NotIn,
        },
        Operator::IsNull => Predicate::Null { negated: false },
        Operator::IsNotNull => Predicate::Null { negated: true },
        Operator::Between | Operator::NotBetween => {
            let mut bounds = list()?.into_iter();
            let (Some(low), Some(high), None) = (bounds.next(), bounds.next(), bounds.next())
            else {
                return None;
            };
            Predicate::Range {
                low,
                high,
                negated: op == Operator::NotBetween,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AutoCrudConfig;
    use crate::model::{Registry, Relationship, ResourceModel};
    use sea_orm::Value;
    use serde_json::json;

    fn registry() -> Registry {
        let artist = ResourceModel::builder("Artist", "artist")
            .field(Field::new("ArtistId", FieldKind::Integer).primary_key().autoincrement())
            .field(Field::new("Name", FieldKind::String))
            .relation(Relationship::collection("Album", "Album", "ArtistId", "ArtistId"))
            .build()
            .unwrap();
        let album = ResourceModel::builder("Album", "album")
            .field(Field::new("AlbumId", FieldKind::Integer).primary_key().autoincrement())
            .field(Field::new("Title", FieldKind::String).not_null())
            .field(Field::new("ArtistId", FieldKind::Integer).not_null())
            .relation(Relationship::scalar("Artist", "Artist", "ArtistId", "ArtistId"))
            .build()
            .unwrap();
        Registry::builder()
            .model(artist)
            .model(album)
            .build(&AutoCrudConfig::default())
            .unwrap()
    }

    fn compile(payload: serde_json::Value) -> (ParsedQuery, Vec<String>) {
        let registry = registry();
        let model = registry.get("Artist").unwrap();
        let payload: FetchPayload = serde_json::from_value(payload).unwrap();
        Qs2Sqla::new(&registry, model).dict2sqla(&payload)
    }

    #[test]
    fn full_payload_compiles() {
        let (query, invalid) = compile(json!({
            "fields": ["ArtistId", "Name"],
            "related": {"Album": ["AlbumId", "Title"]},
            "filters": [
                {"model": "Artist", "field": "ArtistId", "op": "==", "value": 1},
                {"model": "Album", "field": "Title", "op": "ilike", "value": "%rock%"}
            ],
            "sorting": [{"model": "Artist", "field": "Name", "direction": "desc"}]
        }));
        assert!(invalid.is_empty(), "{invalid:?}");
        assert_eq!(query.fields, vec!["ArtistId", "Name"]);
        assert_eq!(
            query.related,
            vec![RelatedLoad {
                relation: "Album".into(),
                columns: Some(vec!["AlbumId".into(), "Title".into()])
            }]
        );
        assert_eq!(
            query.filters[0].alternatives,
            vec![Predicate::Compare(Operator::Eq, Value::from(1i64))]
        );
        assert_eq!(query.filters[1].relation.as_deref(), Some("Album"));
        assert!(query.orders[0].descending);
    }

    #[test]
    fn wildcard_loads_every_column() {
        let (query, invalid) = compile(json!({"related": {"album": "*"}}));
        assert!(invalid.is_empty());
        assert_eq!(query.related[0].columns, None);
    }

    #[test]
    fn unknown_parts_are_reported_individually() {
        let (query, invalid) = compile(json!({
            "fields": ["pippo"],
            "related": {"Genre": "*", "Album": ["Nope"]},
            "filters": [
                {"model": "Genre", "field": "Name", "op": "==", "value": 1},
                {"model": "Artist", "field": "Nope", "op": "==", "value": 1},
                {"model": "Artist", "field": "Name", "op": "approx", "value": 1}
            ],
            "sorting": [{"model": "Artist", "field": "Name", "direction": "sideways"}]
        }));
        assert!(query.filters.is_empty());
        assert!(query.orders.is_empty());
        assert!(query.related.is_empty());
        assert_eq!(
            invalid,
            vec![
                "pippo",
                "Album.Nope",
                "Genre",
                "model=Genre",
                "field=Nope",
                "op=approx",
                "direction=sideways"
            ]
        );
    }

    #[test]
    fn operator_value_shapes() {
        let (query, invalid) = compile(json!({
            "filters": [
                {"field": "ArtistId", "op": "in", "value": [1, 2]},
                {"field": "ArtistId", "op": "between", "value": [1, 9]},
                {"field": "Name", "op": "==", "value": null},
                {"field": "Name", "op": "is_not_null"}
            ]
        }));
        assert!(invalid.is_empty(), "{invalid:?}");
        assert_eq!(
            query.filters[0].alternatives[0],
            Predicate::In {
                values: vec![Value::from(1i64), Value::from(2i64)],
                negated: false
            }
        );
        assert!(matches!(
            query.filters[1].alternatives[0],
            Predicate::Range { negated: false, .. }
        ));
        assert_eq!(
            query.filters[2].alternatives[0],
            Predicate::Null { negated: false }
        );
        assert_eq!(
            query.filters[3].alternatives[0],
            Predicate::Null { negated: true }
        );
    }

    #[test]
    fn badly_shaped_values_are_invalid() {
        let (_, invalid) = compile(json!({
            "filters": [
                {"field": "ArtistId", "op": "in", "value": 3},
                {"field": "ArtistId", "op": "between", "value": [1]},
                {"field": "ArtistId", "op": "==", "value": "abc"}
            ]
        }));
        assert_eq!(
            invalid,
            vec!["ArtistId=3", "ArtistId=[1]", "ArtistId=\"abc\""]
        );
    }

    #[test]
    fn unknown_payload_keys_are_rejected() {
        let result = serde_json::from_value::<FetchPayload>(json!({"filter": []}));
        assert!(result.is_err());
    }

    #[test]
    fn payload_serializes_with_defaults() {
        let payload = FetchPayload::default();
        assert_eq!(
            serde_json::to_value(&payload).unwrap(),
            serde_json::json!({
                "fields": [],
                "related": {},
                "filters": [],
                "sorting": [],
                "pagination": null
            })
        );
    }

    #[test]
    fn pagination_becomes_arguments() {
        let spec = PaginationSpec {
            page: Some(2),
            limit: Some(5),
        };
        assert_eq!(
            spec.to_args("_page", "_limit"),
            vec![
                ("_page".to_string(), "2".to_string()),
                ("_limit".to_string(), "5".to_string())
            ]
        );
    }
}
