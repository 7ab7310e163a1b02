//! Resource model metadata.
//!
//! A [`ResourceModel`] describes one exposed table: its fields, primary key,
//! relationships and allowed verbs. Models are assembled once at startup
//! (explicitly through [`ResourceModel::builder`] or by schema reflection),
//! frozen inside a [`Registry`] and only read afterwards.

pub mod reflect;
pub mod registry;
pub mod value;

pub use registry::{Registry, RegistryBuilder};

use crate::errors::ConfigError;
use crate::verb::Verb;
use sea_orm::Value;
use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;
use utoipa::ToSchema;

/// Storage type family of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    Integer,
    Float,
    Decimal,
    Boolean,
    String,
    Date,
    Time,
    DateTime,
    DateTimeTz,
    Uuid,
    Json,
    Binary,
}

impl FieldKind {
    /// Classify a declared SQL type name.
    ///
    /// Follows SQLite's affinity rules first (`INT` anywhere means integer,
    /// `CHAR`/`CLOB`/`TEXT` mean text) so loosely typed schemas still map.
    #[must_use]
    pub fn from_sql_type(sql_type: &str) -> Self {
        let ty = sql_type.to_ascii_uppercase();
        if ty.contains("INT") || ty.contains("SERIAL") {
            Self::Integer
        } else if ty.contains("BOOL") {
            Self::Boolean
        } else if ty.contains("UUID") {
            Self::Uuid
        } else if ty.contains("JSON") {
            Self::Json
        } else if ty.contains("CHAR") || ty.contains("CLOB") || ty.contains("TEXT") {
            Self::String
        } else if ty.contains("BLOB") || ty.contains("BYTEA") || ty.contains("BINARY") {
            Self::Binary
        } else if ty.contains("REAL") || ty.contains("FLOA") || ty.contains("DOUB") {
            Self::Float
        } else if ty.contains("NUMERIC") || ty.contains("DECIMAL") || ty.contains("MONEY") {
            Self::Decimal
        } else if ty.contains("TIMESTAMPTZ") || ty.contains("WITH TIME ZONE") {
            Self::DateTimeTz
        } else if ty.contains("TIMESTAMP") || ty.contains("DATETIME") {
            Self::DateTime
        } else if ty.contains("DATE") {
            Self::Date
        } else if ty.contains("TIME") {
            Self::Time
        } else {
            Self::String
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Decimal => "decimal",
            Self::Boolean => "boolean",
            Self::String => "string",
            Self::Date => "date",
            Self::Time => "time",
            Self::DateTime => "datetime",
            Self::DateTimeTz => "datetime_tz",
            Self::Uuid => "uuid",
            Self::Json => "json",
            Self::Binary => "binary",
        }
    }

    #[must_use]
    pub fn is_textual(self) -> bool {
        matches!(self, Self::String)
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One column of a resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub kind: FieldKind,
    pub sql_type: String,
    pub primary: bool,
    pub autoincrement: bool,
    pub nullable: bool,
    pub unique: bool,
    pub has_default: bool,
    pub comment: Option<String>,
}

impl Field {
    /// A nullable, non-key column
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            sql_type: kind.as_str().to_ascii_uppercase(),
            primary: false,
            autoincrement: false,
            nullable: true,
            unique: false,
            has_default: false,
            comment: None,
        }
    }

    #[must_use]
    pub fn primary_key(mut self) -> Self {
        self.primary = true;
        self.nullable = false;
        self
    }

    #[must_use]
    pub fn autoincrement(mut self) -> Self {
        self.autoincrement = true;
        self
    }

    #[must_use]
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    #[must_use]
    pub fn with_default(mut self) -> Self {
        self.has_default = true;
        self
    }

    #[must_use]
    pub fn sql_type(mut self, sql_type: impl Into<String>) -> Self {
        self.sql_type = sql_type.into();
        self
    }

    #[must_use]
    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// Clients may supply a value for this field
    #[must_use]
    pub fn is_writable(&self) -> bool {
        !(self.primary && self.autoincrement)
    }

    fn is_required(&self) -> bool {
        self.is_writable() && !self.nullable && !self.has_default
    }
}

/// Whether a relation yields one row or many
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    /// The owning side of a foreign key: `local → target.remote`
    Scalar,
    /// The reverse side: `target.remote → local`
    Collection,
}

/// A named link from one resource to another
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relationship {
    pub name: String,
    pub cardinality: Cardinality,
    /// Name of the target model
    pub target: String,
    /// Column on this model
    pub local_key: String,
    /// Column on the target model
    pub remote_key: String,
    /// Path segment under the owning resource URI
    pub url_segment: String,
}

impl Relationship {
    fn new(
        cardinality: Cardinality,
        name: impl Into<String>,
        target: impl Into<String>,
        local_key: impl Into<String>,
        remote_key: impl Into<String>,
    ) -> Self {
        let name = name.into();
        Self {
            url_segment: name.to_lowercase(),
            name,
            cardinality,
            target: target.into(),
            local_key: local_key.into(),
            remote_key: remote_key.into(),
        }
    }

    /// `self.local_key` references `target.remote_key`
    pub fn scalar(
        name: impl Into<String>,
        target: impl Into<String>,
        local_key: impl Into<String>,
        remote_key: impl Into<String>,
    ) -> Self {
        Self::new(Cardinality::Scalar, name, target, local_key, remote_key)
    }

    /// `target.remote_key` references `self.local_key`
    pub fn collection(
        name: impl Into<String>,
        target: impl Into<String>,
        local_key: impl Into<String>,
        remote_key: impl Into<String>,
    ) -> Self {
        Self::new(Cardinality::Collection, name, target, local_key, remote_key)
    }

    #[must_use]
    pub fn url_segment(mut self, segment: impl Into<String>) -> Self {
        self.url_segment = segment.into();
        self
    }

    fn matches(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name) || self.target.eq_ignore_ascii_case(name)
    }
}

/// A related row or rows attached to a [`Record`] by eager loading
#[derive(Debug, Clone, PartialEq)]
pub enum Related {
    One(Option<Box<Record>>),
    Many(Vec<Record>),
}

/// One materialized row plus any eager-loaded relations
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    pub values: Vec<(String, Value)>,
    pub related: Vec<(String, Related)>,
    /// Fields to render; `None` renders every loaded value
    pub projection: Option<Arc<[String]>>,
}

impl Record {
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.values
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, value)| value)
    }

    /// Plain-text form of a column value; `None` when absent or NULL
    #[must_use]
    pub fn key_string(&self, field: &str) -> Option<String> {
        self.get(field).and_then(value::to_key_string)
    }
}

/// Outcome of checking an inbound payload against the writable fields
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Validation {
    pub missing: Vec<String>,
    pub unknown: Vec<String>,
}

impl Validation {
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.missing.is_empty() && self.unknown.is_empty()
    }
}

/// Machine-readable resource description served under the metadata suffix
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Description {
    pub name: String,
    pub url: String,
    pub methods: Vec<String>,
    pub description: Option<String>,
    pub fields: Vec<FieldDescription>,
    pub relations: Vec<RelationDescription>,
}

#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct FieldDescription {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub primary: bool,
    pub autoincrement: bool,
    pub nullable: bool,
    pub unique: bool,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RelationDescription {
    pub name: String,
    pub target: String,
    pub many: bool,
}

#[derive(Debug, Clone)]
pub struct ResourceModel {
    name: String,
    table: String,
    url: String,
    description: Option<String>,
    collection_suffix: String,
    fields: Vec<Field>,
    primary_key: usize,
    relations: Vec<Relationship>,
    methods: BTreeSet<Verb>,
    required: Vec<String>,
    optional: Vec<String>,
    searchable: Vec<String>,
}

impl ResourceModel {
    pub fn builder(name: impl Into<String>, table: impl Into<String>) -> ResourceModelBuilder {
        ResourceModelBuilder::new(name.into(), table.into())
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Canonical collection path, including any base url
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Last path segment of [`Self::url`], the router's lookup key
    #[must_use]
    pub fn url_segment(&self) -> &str {
        self.url.rsplit('/').next().unwrap_or(&self.url)
    }

    /// `<Name>List`, the key of serialized collections
    #[must_use]
    pub fn collection_key(&self) -> String {
        format!("{}{}", self.name, self.collection_suffix)
    }

    #[must_use]
    pub fn columns(&self) -> &[Field] {
        &self.fields
    }

    #[must_use]
    pub fn column(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    #[must_use]
    pub fn required(&self) -> &[String] {
        &self.required
    }

    #[must_use]
    pub fn optional(&self) -> &[String] {
        &self.optional
    }

    #[must_use]
    pub fn searchable(&self) -> &[String] {
        &self.searchable
    }

    /// First primary key column; models without one are rejected at build time
    #[must_use]
    pub fn primary_key_field(&self) -> &Field {
        &self.fields[self.primary_key]
    }

    #[must_use]
    pub fn relations(&self) -> &[Relationship] {
        &self.relations
    }

    /// Look a relation up by its name or its target's name, ignoring case.
    ///
    /// `None` means "unknown relation"; callers decide whether that is a
    /// client error.
    #[must_use]
    pub fn related(&self, name: &str) -> Option<&Relationship> {
        self.relations
            .iter()
            .find(|r| r.name.eq_ignore_ascii_case(name))
            .or_else(|| self.relations.iter().find(|r| r.matches(name)))
    }

    #[must_use]
    pub fn relation_by_segment(&self, segment: &str) -> Option<&Relationship> {
        self.relations
            .iter()
            .find(|r| r.url_segment.eq_ignore_ascii_case(segment))
    }

    #[must_use]
    pub fn allows(&self, verb: Verb) -> bool {
        self.methods.contains(&verb)
    }

    #[must_use]
    pub fn methods(&self) -> Vec<String> {
        self.methods.iter().map(|v| v.as_str().to_string()).collect()
    }

    /// Check a create/update payload; empty lists mean the payload fits
    #[must_use]
    pub fn validate(&self, data: &Map<String, JsonValue>) -> Validation {
        let missing = self
            .required
            .iter()
            .filter(|name| data.get(name.as_str()).is_none_or(JsonValue::is_null))
            .cloned()
            .collect();
        let unknown = data
            .keys()
            .filter(|key| !self.required.contains(key) && !self.optional.contains(key))
            .cloned()
            .collect();
        Validation { missing, unknown }
    }

    #[must_use]
    pub fn description(&self) -> Description {
        Description {
            name: self.name.clone(),
            url: self.url.clone(),
            methods: self.methods(),
            description: self.description.clone(),
            fields: self
                .fields
                .iter()
                .map(|f| FieldDescription {
                    name: f.name.clone(),
                    kind: f.kind.to_string(),
                    primary: f.primary,
                    autoincrement: f.autoincrement,
                    nullable: f.nullable,
                    unique: f.unique,
                    comment: f.comment.clone(),
                })
                .collect(),
            relations: self
                .relations
                .iter()
                .map(|r| RelationDescription {
                    name: r.name.clone(),
                    target: r.target.clone(),
                    many: r.cardinality == Cardinality::Collection,
                })
                .collect(),
        }
    }

    #[must_use]
    pub fn resource_uri(&self, id: &str) -> String {
        format!("{}/{id}", self.url)
    }

    /// URI of the row, `None` when its primary key was not loaded
    #[must_use]
    pub fn record_uri(&self, record: &Record) -> Option<String> {
        record
            .key_string(&self.primary_key_field().name)
            .map(|id| self.resource_uri(&id))
    }

    /// `self` plus one sub-resource URI per relation
    #[must_use]
    pub fn links(&self, record: &Record) -> Map<String, JsonValue> {
        let mut links = Map::new();
        if let Some(uri) = self.record_uri(record) {
            for relation in &self.relations {
                links.insert(
                    relation.name.clone(),
                    JsonValue::String(format!("{uri}/{}", relation.url_segment)),
                );
            }
            links.insert("self".to_string(), JsonValue::String(uri));
        }
        links
    }

    /// Serialize a record.
    ///
    /// With `expand_relations`, eager-loaded scalar relations are inlined
    /// under the relation name and collections under `<Relation>List`.
    #[must_use]
    pub fn to_dict(
        &self,
        registry: &Registry,
        record: &Record,
        expand_relations: bool,
        with_links: bool,
    ) -> Map<String, JsonValue> {
        let mut out = Map::new();
        for (name, value) in &record.values {
            let visible = record
                .projection
                .as_ref()
                .is_none_or(|fields| fields.contains(name));
            if visible {
                out.insert(name.clone(), value::to_json(value));
            }
        }

        if expand_relations {
            for (name, related) in &record.related {
                let Some(relation) = self.relations.iter().find(|r| &r.name == name) else {
                    continue;
                };
                let Some(target) = registry.get(&relation.target) else {
                    continue;
                };
                match related {
                    Related::One(row) => {
                        let rendered = row.as_ref().map_or(JsonValue::Null, |row| {
                            JsonValue::Object(target.to_dict(registry, row, false, with_links))
                        });
                        out.insert(relation.name.clone(), rendered);
                    }
                    Related::Many(rows) => {
                        let rendered = rows
                            .iter()
                            .map(|row| {
                                JsonValue::Object(target.to_dict(registry, row, false, with_links))
                            })
                            .collect();
                        out.insert(
                            format!("{}{}", relation.name, target.collection_suffix),
                            JsonValue::Array(rendered),
                        );
                    }
                }
            }
        }

        if with_links {
            out.insert("_links".to_string(), JsonValue::Object(self.links(record)));
        }
        out
    }

    pub(crate) fn mount(&mut self, base_url: &str) {
        self.url = format!("{}{}", base_url.trim_end_matches('/'), self.url);
    }

    pub(crate) fn restrict_methods(&mut self, read_only: bool, fetch_enabled: bool) {
        if read_only {
            self.methods
                .retain(|v| matches!(v, Verb::Get | Verb::Head | Verb::Fetch | Verb::Options));
        }
        if !fetch_enabled {
            self.methods.remove(&Verb::Fetch);
        }
    }

    pub(crate) fn push_relation(&mut self, relation: Relationship) {
        self.relations.push(relation);
    }
}

/// Explicit model declaration
#[derive(Debug, Clone)]
pub struct ResourceModelBuilder {
    name: String,
    table: String,
    url: Option<String>,
    description: Option<String>,
    collection_suffix: String,
    fields: Vec<Field>,
    hidden: HashSet<String>,
    relations: Vec<Relationship>,
    methods: Option<BTreeSet<Verb>>,
}

impl ResourceModelBuilder {
    fn new(name: String, table: String) -> Self {
        Self {
            name,
            table,
            url: None,
            description: None,
            collection_suffix: "List".to_string(),
            fields: Vec::new(),
            hidden: HashSet::new(),
            relations: Vec::new(),
            methods: None,
        }
    }

    #[must_use]
    pub fn field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    #[must_use]
    pub fn fields(mut self, fields: impl IntoIterator<Item = Field>) -> Self {
        self.fields.extend(fields);
        self
    }

    /// Exclude a column from every representation
    #[must_use]
    pub fn hidden(mut self, name: impl Into<String>) -> Self {
        self.hidden.insert(name.into());
        self
    }

    #[must_use]
    pub fn relation(mut self, relation: Relationship) -> Self {
        self.relations.push(relation);
        self
    }

    /// Collection path relative to the base url; defaults to `/<name lowercased>`
    #[must_use]
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn collection_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.collection_suffix = suffix.into();
        self
    }

    #[must_use]
    pub fn methods(mut self, methods: impl IntoIterator<Item = Verb>) -> Self {
        self.methods = Some(methods.into_iter().collect());
        self
    }

    /// Validate the declaration and compute the derived field sets
    ///
    /// # Errors
    /// [`ConfigError::MissingPrimaryKey`] or [`ConfigError::DuplicateField`].
    pub fn build(self) -> Result<ResourceModel, ConfigError> {
        let fields: Vec<Field> = self
            .fields
            .into_iter()
            .filter(|f| !f.name.starts_with('_') && !self.hidden.contains(&f.name))
            .collect();

        let mut seen = HashSet::new();
        for field in &fields {
            if !seen.insert(field.name.as_str()) {
                return Err(ConfigError::DuplicateField {
                    model: self.name,
                    field: field.name.clone(),
                });
            }
        }

        let primary_key = fields
            .iter()
            .position(|f| f.primary)
            .ok_or_else(|| ConfigError::MissingPrimaryKey(self.name.clone()))?;

        let required = fields
            .iter()
            .filter(|f| f.is_required())
            .map(|f| f.name.clone())
            .collect();
        let optional = fields
            .iter()
            .filter(|f| f.is_writable() && !f.is_required())
            .map(|f| f.name.clone())
            .collect();
        let searchable = fields
            .iter()
            .filter(|f| f.kind.is_textual())
            .map(|f| f.name.clone())
            .collect();

        let url = self
            .url
            .unwrap_or_else(|| format!("/{}", self.name.to_lowercase()));
        let url = if url.starts_with('/') { url } else { format!("/{url}") };

        Ok(ResourceModel {
            name: self.name,
            table: self.table,
            url,
            description: self.description,
            collection_suffix: self.collection_suffix,
            fields,
            primary_key,
            relations: self.relations,
            methods: self.methods.unwrap_or_else(|| Verb::ALL.into_iter().collect()),
            required,
            optional,
            searchable,
        })
    }
}
