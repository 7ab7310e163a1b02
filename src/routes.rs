use crate::config::AutoCrudConfig;
use crate::errors::{ApiError, ConfigError};
use crate::model::{Registry, ResourceModel};
use crate::openapi::ApiDoc;
use crate::response::Reply;
use crate::service::ResourceService;
use crate::verb::Verb;
use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, RawQuery, State},
    http::{HeaderMap, Method, StatusCode},
    routing::{any, get},
};
use sea_orm::DatabaseConnection;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use utoipa::OpenApi;

/// Shared application state: one connection pool, one frozen registry
#[derive(Debug, Clone)]
pub struct AutoCrud {
    db: DatabaseConnection,
    registry: Arc<Registry>,
    config: Arc<AutoCrudConfig>,
}

impl AutoCrud {
    #[must_use]
    pub fn new(db: DatabaseConnection, registry: Registry, config: AutoCrudConfig) -> Self {
        Self {
            db,
            registry: Arc::new(registry),
            config: Arc::new(config),
        }
    }

    /// Reflect every table of the connected database into resources
    ///
    /// # Errors
    /// Reflection failures and registry invariant violations.
    pub async fn from_database(
        db: DatabaseConnection,
        config: AutoCrudConfig,
    ) -> Result<Self, ConfigError> {
        let registry = Registry::builder().reflect(&db, &config).await?.build(&config)?;
        Ok(Self::new(db, registry, config))
    }

    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    #[must_use]
    pub fn config(&self) -> &AutoCrudConfig {
        &self.config
    }

    /// Every generated route, mounted under the configured base url
    pub fn router(self) -> Router {
        let base = self.config.base_url.trim_end_matches('/').to_string();
        let mut routes = Router::new()
            .route("/openapi.json", get(openapi))
            .route("/{resource}", any(collection))
            .route("/{resource}/{id}", any(item))
            .route("/{resource}/{id}/{segment}", any(subresource));
        if self.config.resources_url_enabled {
            routes = routes.route(&self.config.resources_url, get(resources));
        }
        tracing::info!(
            base = %base,
            resources = self.registry.len(),
            "Mounted autocrud routes"
        );
        let routes = routes.with_state(self);
        if base.is_empty() {
            routes
        } else {
            Router::new().nest(&base, routes)
        }
    }

    fn model(&self, segment: &str) -> Result<&ResourceModel, ApiError> {
        self.registry
            .by_url_segment(segment)
            .ok_or_else(|| ApiError::not_found(segment, None))
    }

    fn service<'a>(&'a self, model: &'a ResourceModel) -> ResourceService<'a> {
        ResourceService::new(&self.db, &self.registry, &self.config, model)
    }
}

fn query_args(raw: Option<&str>) -> Vec<(String, String)> {
    raw.map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
        .unwrap_or_default()
}

/// Normalize the method and check it against the resource's verbs
fn resolve_verb(
    model: &ResourceModel,
    method: &Method,
    headers: &HeaderMap,
    args: &[(String, String)],
) -> Result<Verb, ApiError> {
    let flag = args
        .iter()
        .find(|(k, _)| k == "_method")
        .map(|(_, v)| v.as_str());
    let verb = Verb::resolve(method, headers, flag)
        .ok_or_else(|| ApiError::method_not_allowed(method.as_str(), model.methods()))?;
    if !model.allows(verb) {
        tracing::warn!(resource = %model.name(), %verb, "Verb not allowed");
        return Err(ApiError::method_not_allowed(verb.as_str(), model.methods()));
    }
    Ok(verb)
}

fn strip_head(verb: Verb, reply: Reply) -> Reply {
    if verb == Verb::Head {
        reply.without_body()
    } else {
        reply
    }
}

async fn collection(
    State(app): State<AutoCrud>,
    Path(resource): Path<String>,
    method: Method,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> Result<Reply, ApiError> {
    let model = app.model(&resource)?;
    let args = query_args(query.as_deref());
    let verb = resolve_verb(model, &method, &headers, &args)?;
    let service = app.service(model);

    let reply = match verb {
        Verb::Get | Verb::Head => service.list(&args, &headers).await?,
        Verb::Post => service.create(&body).await?,
        Verb::Fetch => service.fetch(&args, &headers, &body).await?,
        Verb::Options => service.options(),
        Verb::Put | Verb::Patch | Verb::Delete => {
            return Err(ApiError::method_not_allowed(verb.as_str(), model.methods()));
        }
    };
    Ok(strip_head(verb, reply))
}

async fn item(
    State(app): State<AutoCrud>,
    Path((resource, id)): Path<(String, String)>,
    method: Method,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> Result<Reply, ApiError> {
    let model = app.model(&resource)?;
    let args = query_args(query.as_deref());
    let verb = resolve_verb(model, &method, &headers, &args)?;
    let service = app.service(model);

    let describe = app.config.metadata_enabled && id == app.config.metadata_segment();
    let reply = match verb {
        Verb::Get | Verb::Head if describe => service.describe()?,
        Verb::Get | Verb::Head => service.get(&id, &args, &headers).await?,
        Verb::Put => service.replace(&id, &headers, &body).await?,
        Verb::Patch => service.modify(&id, &headers, &body).await?,
        Verb::Delete => service.delete(&id, &headers).await?,
        Verb::Options => service.options(),
        Verb::Post | Verb::Fetch => {
            return Err(ApiError::method_not_allowed(verb.as_str(), model.methods()));
        }
    };
    Ok(strip_head(verb, reply))
}

async fn subresource(
    State(app): State<AutoCrud>,
    Path((resource, id, segment)): Path<(String, String, String)>,
    method: Method,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
) -> Result<Reply, ApiError> {
    let model = app.model(&resource)?;
    let args = query_args(query.as_deref());
    let verb = resolve_verb(model, &method, &headers, &args)?;
    let service = app.service(model);

    let reply = match verb {
        Verb::Get | Verb::Head => service.subresource(&id, &segment, &args, &headers).await?,
        Verb::Options => service.options(),
        other => return Err(ApiError::method_not_allowed(other.as_str(), vec!["GET".into()])),
    };
    Ok(strip_head(verb, reply))
}

async fn resources(State(app): State<AutoCrud>) -> Reply {
    Reply::json(StatusCode::OK, JsonValue::Object(app.registry.index()))
}

async fn openapi() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
