use super::reflect::{TableDef, reflector_for};
use super::{Relationship, ResourceModel};
use crate::config::AutoCrudConfig;
use crate::errors::ConfigError;
use sea_orm::{ConnectionTrait, DatabaseConnection};
use serde_json::{Map, Value as JsonValue};
use std::collections::HashMap;

/// Immutable set of exposed resources, shared by every request
#[derive(Debug, Clone, Default)]
pub struct Registry {
    models: Vec<ResourceModel>,
    by_name: HashMap<String, usize>,
    by_segment: HashMap<String, usize>,
}

impl Registry {
    #[must_use]
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Model by name, ignoring case
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ResourceModel> {
        self.by_name
            .get(&name.to_lowercase())
            .map(|&idx| &self.models[idx])
    }

    /// Model by the last segment of its url, ignoring case
    #[must_use]
    pub fn by_url_segment(&self, segment: &str) -> Option<&ResourceModel> {
        self.by_segment
            .get(&segment.to_lowercase())
            .map(|&idx| &self.models[idx])
    }

    pub fn models(&self) -> impl Iterator<Item = &ResourceModel> {
        self.models.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.models.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// `{ "Artist": "/artist{/ArtistId}", ... }`
    #[must_use]
    pub fn index(&self) -> Map<String, JsonValue> {
        self.models
            .iter()
            .map(|m| {
                (
                    m.name().to_string(),
                    JsonValue::String(format!("{}{{/{}}}", m.url(), m.primary_key_field().name)),
                )
            })
            .collect()
    }
}

/// Collects explicit and reflected models, then freezes them into a [`Registry`]
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    models: Vec<ResourceModel>,
    tables: Vec<TableDef>,
}

/// `invoice_line` → `InvoiceLine`, `Artist` stays `Artist`
fn model_name(table: &str) -> String {
    table
        .split(['_', ' ', '-'])
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            chars.next().map_or_else(String::new, |first| {
                first.to_uppercase().chain(chars).collect::<String>()
            })
        })
        .collect()
}

impl RegistryBuilder {
    /// Register an explicitly declared model; it wins over a reflected table
    /// with the same table name
    #[must_use]
    pub fn model(mut self, model: ResourceModel) -> Self {
        self.models.push(model);
        self
    }

    /// Register reflected table definitions
    #[must_use]
    pub fn tables(mut self, tables: impl IntoIterator<Item = TableDef>) -> Self {
        self.tables.extend(tables);
        self
    }

    /// Reflect every table of the connection, minus `config.exclude_tables`
    ///
    /// # Errors
    /// Unsupported backend or a failing catalog query.
    pub async fn reflect(
        self,
        db: &DatabaseConnection,
        config: &AutoCrudConfig,
    ) -> Result<Self, ConfigError> {
        let reflector = reflector_for(db.get_database_backend())?;
        let tables = reflector.tables(db, config.schema.as_deref()).await?;
        let tables: Vec<TableDef> = tables
            .into_iter()
            .filter(|t| {
                !config
                    .exclude_tables
                    .iter()
                    .any(|excluded| excluded.eq_ignore_ascii_case(&t.name))
            })
            .collect();
        tracing::debug!(count = tables.len(), "Reflected tables");
        Ok(self.tables(tables))
    }

    /// Resolve relations, check invariants and freeze
    ///
    /// # Errors
    /// Any [`ConfigError`] describing an inconsistent declaration.
    pub fn build(self, config: &AutoCrudConfig) -> Result<Registry, ConfigError> {
        let Self {
            mut models,
            tables,
        } = self;

        let explicit = models.len();
        for table in &tables {
            if models
                .iter()
                .any(|m| m.table().eq_ignore_ascii_case(&table.name))
            {
                continue;
            }
            let mut builder =
                ResourceModel::builder(model_name(&table.name), &table.name).fields(table.columns.clone());
            if let Some(comment) = &table.comment {
                builder = builder.description(comment);
            }
            match builder.build() {
                Ok(model) => models.push(model),
                Err(ConfigError::MissingPrimaryKey(name)) => {
                    tracing::warn!(table = %table.name, model = %name, "Skipping table without primary key");
                }
                Err(err) => return Err(err),
            }
        }

        let by_table: HashMap<String, usize> = models
            .iter()
            .enumerate()
            .map(|(idx, m)| (m.table().to_lowercase(), idx))
            .collect();

        for table in &tables {
            let Some(&owner) = by_table.get(&table.name.to_lowercase()) else {
                continue;
            };
            if owner < explicit {
                continue;
            }
            for fk in &table.foreign_keys {
                let Some(&target) = by_table.get(&fk.target_table.to_lowercase()) else {
                    tracing::debug!(
                        table = %table.name,
                        target = %fk.target_table,
                        "Foreign key to an unexposed table"
                    );
                    continue;
                };
                let remote = fk
                    .target_column
                    .clone()
                    .unwrap_or_else(|| models[target].primary_key_field().name.clone());

                let scalar_name = unique_relation_name(&models[owner], models[target].name(), &fk.column);
                let scalar_segment =
                    unique_segment(&models[owner], models[target].url_segment(), &scalar_name);
                let scalar = Relationship::scalar(
                    scalar_name,
                    models[target].name(),
                    &fk.column,
                    &remote,
                )
                .url_segment(scalar_segment);

                let collection_name =
                    unique_relation_name(&models[target], models[owner].name(), &fk.column);
                let collection_segment =
                    unique_segment(&models[target], models[owner].url_segment(), &collection_name);
                let collection = Relationship::collection(
                    collection_name,
                    models[owner].name(),
                    &remote,
                    &fk.column,
                )
                .url_segment(collection_segment);

                models[owner].push_relation(scalar);
                models[target].push_relation(collection);
            }
        }

        let mut by_name = HashMap::new();
        let mut by_segment: HashMap<String, usize> = HashMap::new();
        for (idx, model) in models.iter_mut().enumerate() {
            model.mount(&config.base_url);
            model.restrict_methods(config.read_only, config.fetch_enabled);

            if by_name.insert(model.name().to_lowercase(), idx).is_some() {
                return Err(ConfigError::DuplicateModel(model.name().to_string()));
            }
        }
        for (idx, model) in models.iter().enumerate() {
            if let Some(&first) = by_segment.get(&model.url_segment().to_lowercase()) {
                return Err(ConfigError::DuplicateUrl {
                    url: model.url().to_string(),
                    first: models[first].name().to_string(),
                    second: model.name().to_string(),
                });
            }
            by_segment.insert(model.url_segment().to_lowercase(), idx);
        }

        for model in &models {
            for relation in model.relations() {
                let target = by_name
                    .get(&relation.target.to_lowercase())
                    .map(|&idx| &models[idx])
                    .ok_or_else(|| ConfigError::UnknownModel {
                        model: model.name().to_string(),
                        relation: relation.name.clone(),
                        target: relation.target.clone(),
                    })?;
                if model.column(&relation.local_key).is_none() {
                    return Err(ConfigError::UnknownKey {
                        model: model.name().to_string(),
                        relation: relation.name.clone(),
                        column: relation.local_key.clone(),
                    });
                }
                if target.column(&relation.remote_key).is_none() {
                    return Err(ConfigError::UnknownKey {
                        model: model.name().to_string(),
                        relation: relation.name.clone(),
                        column: relation.remote_key.clone(),
                    });
                }
            }
        }

        for model in &models {
            tracing::info!(
                resource = %model.name(),
                url = %model.url(),
                fields = model.columns().len(),
                relations = model.relations().len(),
                "Registered resource"
            );
        }

        Ok(Registry {
            models,
            by_name,
            by_segment,
        })
    }
}

fn unique_relation_name(model: &ResourceModel, preferred: &str, column: &str) -> String {
    let taken = |name: &str| model.related_exact(name) || model.column(name).is_some();
    if taken(preferred) {
        format!("{preferred}_{column}")
    } else {
        preferred.to_string()
    }
}

fn unique_segment(model: &ResourceModel, preferred: &str, relation_name: &str) -> String {
    if model.relation_by_segment(preferred).is_some() {
        relation_name.to_lowercase()
    } else {
        preferred.to_lowercase()
    }
}

impl ResourceModel {
    fn related_exact(&self, name: &str) -> bool {
        self.relations()
            .iter()
            .any(|r| r.name.eq_ignore_ascii_case(name))
    }
}
