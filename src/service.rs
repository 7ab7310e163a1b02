//! One resource's verbs.
//!
//! [`ResourceService`] is built per request from the shared registry and
//! configuration. Each verb validates its input, compiles the query, runs it
//! through the executor and shapes a [`Reply`]. Writes run in a single
//! transaction and read their preconditions inside it.

use crate::config::AutoCrudConfig;
use crate::errors::ApiError;
use crate::executor::{self, Page};
use crate::grammar::Arguments;
use crate::model::{Record, Registry, ResourceModel, value};
use crate::query::{
    FetchPayload, FilterClause, Operator, PageStatus, Pagination, ParsedQuery, Predicate,
    Qs2Sqla, QueryPlan, get_pagination,
};
use crate::response::{
    Body, Reply, csv_reply, etag, etag_matches, etag_matches_strong, flatten, navigation,
    navigation_link_header, resource_link_header,
};
use axum::http::{HeaderMap, StatusCode, header};
use sea_orm::{DatabaseConnection, TransactionTrait};
use serde_json::{Map, Value as JsonValue};
use std::slice;

/// Presentation switches read from the query string
#[derive(Debug, Default)]
struct ListOptions {
    export: Option<String>,
    as_table: bool,
    no_links: bool,
}

pub struct ResourceService<'a> {
    db: &'a DatabaseConnection,
    registry: &'a Registry,
    config: &'a AutoCrudConfig,
    model: &'a ResourceModel,
    arguments: Arguments,
}

impl<'a> ResourceService<'a> {
    #[must_use]
    pub fn new(
        db: &'a DatabaseConnection,
        registry: &'a Registry,
        config: &'a AutoCrudConfig,
        model: &'a ResourceModel,
    ) -> Self {
        Self {
            db,
            registry,
            config,
            model,
            arguments: Arguments::default(),
        }
    }

    // ============================================================================
    // Reads
    // ============================================================================

    /// GET on the collection
    ///
    /// # Errors
    /// 400 for rejected query tokens, 500 for storage failures.
    pub async fn list(
        &self,
        args: &[(String, String)],
        headers: &HeaderMap,
    ) -> Result<Reply, ApiError> {
        let (query, page, limit) = self.compile_query(self.model, args)?;
        let expand = !query.related.is_empty();
        let plan = QueryPlan::new(query, page, limit, self.config.join);
        let result = executor::select_page(self.db, self.registry, self.model, &plan).await?;
        self.render_list(self.model, result, expand, self.model.url(), args, limit, headers)
    }

    /// FETCH on the collection: the query comes from a JSON payload
    ///
    /// # Errors
    /// 422 for a body that is not a payload, 400 for rejected payload parts.
    pub async fn fetch(
        &self,
        args: &[(String, String)],
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<Reply, ApiError> {
        let payload: FetchPayload = if is_blank(body) {
            FetchPayload::default()
        } else {
            serde_json::from_slice(body).map_err(|e| {
                ApiError::validation_failed(Vec::new(), Vec::new(), vec![e.to_string()])
            })?
        };

        let (query, mut invalid) = Qs2Sqla::new(self.registry, self.model).dict2sqla(&payload);
        let page_args = match payload.pagination {
            Some(spec) => spec.to_args(self.arguments.page, self.arguments.limit),
            None => args
                .iter()
                .filter(|(k, _)| self.arguments.is_pagination(k))
                .cloned()
                .collect(),
        };
        let (page, limit, page_invalid) =
            get_pagination(&page_args, &self.arguments, self.config.max_limit);
        invalid.extend(page_invalid);
        self.reject_invalid(invalid)?;

        let expand = !query.related.is_empty();
        let plan = QueryPlan::new(query, page, limit, self.config.join);
        let result = executor::select_page(self.db, self.registry, self.model, &plan).await?;
        self.render_list(self.model, result, expand, self.model.url(), args, limit, headers)
    }

    /// GET on one resource; `_fields`, `_related` and `_no_links` apply
    ///
    /// # Errors
    /// 404 for an unknown id, 400 for rejected query tokens.
    pub async fn get(
        &self,
        id: &str,
        args: &[(String, String)],
        headers: &HeaderMap,
    ) -> Result<Reply, ApiError> {
        let (query, _, _) = self.compile_query(self.model, args)?;
        let mut record = executor::find_by_pk(self.db, self.model, id)
            .await?
            .ok_or_else(|| self.not_found(id))?;

        if !query.fields.is_empty() {
            record.projection = Some(query.fields.into());
        }
        for load in &query.related {
            executor::load_related(
                self.db,
                self.registry,
                self.model,
                slice::from_mut(&mut record),
                load,
            )
            .await?;
        }

        let with_links = !self.list_options(args).no_links;
        let body = self
            .model
            .to_dict(self.registry, &record, !query.related.is_empty(), with_links);
        let reply = Reply::json(StatusCode::OK, JsonValue::Object(body)).header(
            header::LINK,
            &resource_link_header(&self.model.links(&record)),
        );
        Ok(self.conditional_read(reply, headers))
    }

    /// GET `/{resource}/{id}/{segment}`: the rows of one relation
    ///
    /// # Errors
    /// 404 for an unknown relation segment or parent id.
    pub async fn subresource(
        &self,
        id: &str,
        segment: &str,
        args: &[(String, String)],
        headers: &HeaderMap,
    ) -> Result<Reply, ApiError> {
        let relation = self
            .model
            .relation_by_segment(segment)
            .ok_or_else(|| ApiError::not_found(segment, None))?;
        let target = self
            .registry
            .get(&relation.target)
            .ok_or_else(|| ApiError::not_found(relation.target.as_str(), None))?;
        let parent = executor::find_by_pk(self.db, self.model, id)
            .await?
            .ok_or_else(|| self.not_found(id))?;

        let (mut query, page, limit) = self.compile_query(target, args)?;
        let expand = !query.related.is_empty();
        let key = parent
            .get(&relation.local_key)
            .filter(|v| !value::is_null(v))
            .cloned();
        let result = match key {
            None => Page {
                records: Vec::new(),
                pagination: Pagination::new(page, limit, 0),
            },
            Some(key) => {
                query.filters.push(FilterClause {
                    relation: None,
                    field: relation.remote_key.clone(),
                    alternatives: vec![Predicate::Compare(Operator::Eq, key)],
                });
                let plan = QueryPlan::new(query, page, limit, self.config.join);
                executor::select_page(self.db, self.registry, target, &plan).await?
            }
        };

        let path = format!("{}/{}", self.model.resource_uri(id), relation.url_segment);
        self.render_list(target, result, expand, &path, args, limit, headers)
    }

    /// The resource description served under the metadata suffix
    ///
    /// # Errors
    /// 500 if the description cannot be serialized.
    pub fn describe(&self) -> Result<Reply, ApiError> {
        let body = serde_json::to_value(self.model.description())
            .map_err(|e| ApiError::internal("Cannot describe resource", Some(e.to_string())))?;
        Ok(Reply::json(StatusCode::OK, body))
    }

    #[must_use]
    pub fn options(&self) -> Reply {
        Reply::empty(StatusCode::NO_CONTENT).header(header::ALLOW, &self.model.methods().join(", "))
    }

    // ============================================================================
    // Writes
    // ============================================================================

    /// POST: insert unless an identical row exists
    ///
    /// # Errors
    /// 400 for a body that is not a non-empty object, 422 for validation failures,
    /// 409 (with `Location`) for duplicates.
    pub async fn create(&self, body: &[u8]) -> Result<Reply, ApiError> {
        let data = json_object(body)?;
        let validation = self.model.validate(&data);
        let (bound, invalid) = executor::bind_payload(self.model, &data);
        if !validation.is_valid() || !invalid.is_empty() {
            return Err(ApiError::validation_failed(
                validation.missing,
                validation.unknown,
                invalid,
            ));
        }

        let txn = self.db.begin().await?;
        if let Some(existing) = executor::find_matching(&txn, self.model, &bound).await? {
            return Err(ApiError::conflict(
                "Resource already exists",
                self.model.record_uri(&existing),
            ));
        }
        let record = executor::insert(&txn, self.model, &bound).await?;
        txn.commit().await?;

        tracing::info!(
            resource = %self.model.name(),
            uri = ?self.model.record_uri(&record),
            "Created resource"
        );
        Ok(self.item_reply(&record, StatusCode::CREATED, true))
    }

    /// PUT: full replacement, or creation at the path id
    ///
    /// # Errors
    /// 422 for missing/unknown/invalid fields, 428/412 for preconditions.
    pub async fn replace(
        &self,
        id: &str,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<Reply, ApiError> {
        let pk_name = self.model.primary_key_field().name.clone();
        let key = executor::pk_value(self.model, id).ok_or_else(|| self.not_found(id))?;
        let mut data = json_object(body)?;
        data.remove(&pk_name);

        let mut validation = self.model.validate(&data);
        validation.missing.retain(|name| name != &pk_name);
        let (mut bound, invalid) = executor::bind_payload(self.model, &data);
        if !validation.is_valid() || !invalid.is_empty() {
            return Err(ApiError::validation_failed(
                validation.missing,
                validation.unknown,
                invalid,
            ));
        }

        let txn = self.db.begin().await?;
        let Some(existing) = executor::find_by_pk(&txn, self.model, id).await? else {
            bound.push((pk_name, key));
            let record = executor::insert(&txn, self.model, &bound).await?;
            txn.commit().await?;
            tracing::info!(resource = %self.model.name(), id, "Created resource by PUT");
            return Ok(self.item_reply(&record, StatusCode::CREATED, true));
        };

        self.check_precondition(headers, &existing)?;
        executor::update(&txn, self.model, key, &bound).await?;
        let record = executor::find_by_pk(&txn, self.model, id)
            .await?
            .ok_or_else(|| self.not_found(id))?;
        txn.commit().await?;
        Ok(self.item_reply(&record, StatusCode::OK, false))
    }

    /// PATCH: partial update of an existing row
    ///
    /// # Errors
    /// 404, 422 for unknown/invalid fields, 428/412 for preconditions.
    pub async fn modify(
        &self,
        id: &str,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<Reply, ApiError> {
        let key = executor::pk_value(self.model, id).ok_or_else(|| self.not_found(id))?;
        let mut data = json_object(body)?;
        data.remove(&self.model.primary_key_field().name);

        let validation = self.model.validate(&data);
        let (bound, invalid) = executor::bind_payload(self.model, &data);
        if !validation.unknown.is_empty() || !invalid.is_empty() {
            return Err(ApiError::validation_failed(
                Vec::new(),
                validation.unknown,
                invalid,
            ));
        }

        let txn = self.db.begin().await?;
        let existing = executor::find_by_pk(&txn, self.model, id)
            .await?
            .ok_or_else(|| self.not_found(id))?;
        self.check_precondition(headers, &existing)?;
        executor::update(&txn, self.model, key, &bound).await?;
        let record = executor::find_by_pk(&txn, self.model, id)
            .await?
            .ok_or_else(|| self.not_found(id))?;
        txn.commit().await?;
        Ok(self.item_reply(&record, StatusCode::OK, false))
    }

    /// # Errors
    /// 404, 428/412 for preconditions, 422 when other rows still reference it.
    pub async fn delete(&self, id: &str, headers: &HeaderMap) -> Result<Reply, ApiError> {
        let key = executor::pk_value(self.model, id).ok_or_else(|| self.not_found(id))?;
        let txn = self.db.begin().await?;
        let existing = executor::find_by_pk(&txn, self.model, id)
            .await?
            .ok_or_else(|| self.not_found(id))?;
        self.check_precondition(headers, &existing)?;
        executor::delete(&txn, self.model, key).await?;
        txn.commit().await?;

        tracing::info!(resource = %self.model.name(), id, "Deleted resource");
        Ok(Reply::empty(StatusCode::NO_CONTENT))
    }

    // ============================================================================
    // Helpers
    // ============================================================================

    fn not_found(&self, id: &str) -> ApiError {
        ApiError::not_found(self.model.name(), Some(id.to_string()))
    }

    fn reject_invalid(&self, invalid: Vec<String>) -> Result<(), ApiError> {
        if invalid.is_empty() {
            return Ok(());
        }
        tracing::warn!(resource = %self.model.name(), ?invalid, "Rejected query");
        Err(ApiError::invalid_tokens(invalid))
    }

    /// Compile query-string arguments against `model`
    fn compile_query(
        &self,
        model: &ResourceModel,
        args: &[(String, String)],
    ) -> Result<(ParsedQuery, u64, Option<u64>), ApiError> {
        let (page, limit, mut invalid) =
            get_pagination(args, &self.arguments, self.config.max_limit);

        let args: Vec<(String, String)> = if self.config.query_string_filters_enabled {
            args.to_vec()
        } else {
            args.iter()
                .filter(|(k, _)| self.arguments.is_scalar(k))
                .cloned()
                .collect()
        };
        let (query, parse_invalid) = Qs2Sqla::new(self.registry, model).parse(&args);
        invalid.extend(parse_invalid);
        self.reject_invalid(invalid)?;
        Ok((query, page, limit))
    }

    fn list_options(&self, args: &[(String, String)]) -> ListOptions {
        let mut options = ListOptions::default();
        for (key, value) in args {
            if key == self.arguments.export && self.config.export_enabled {
                options.export = Some(if value.trim().is_empty() {
                    self.model.name().to_string()
                } else {
                    value.trim().to_string()
                });
            } else if key == self.arguments.as_table {
                options.as_table = true;
            } else if key == self.arguments.no_links {
                options.no_links = true;
            }
        }
        options
    }

    #[allow(clippy::too_many_arguments)]
    fn render_list(
        &self,
        model: &ResourceModel,
        page: Page,
        expand: bool,
        path: &str,
        args: &[(String, String)],
        limit: Option<u64>,
        headers: &HeaderMap,
    ) -> Result<Reply, ApiError> {
        let options = self.list_options(args);
        let tabular = options.export.is_some() || options.as_table;
        let with_links = !options.no_links && !tabular;
        let pagination = page.pagination;

        let items: Vec<Map<String, JsonValue>> = page
            .records
            .iter()
            .map(|record| model.to_dict(self.registry, record, expand, with_links))
            .collect();

        if let Some(filename) = &options.export {
            let rows: Vec<_> = items.iter().flat_map(flatten).collect();
            return Ok(csv_reply(&rows, filename, self.config.csv_delimiter)?
                .headers(pagination.headers()));
        }

        let status = pagination.status();
        if status == PageStatus::Beyond {
            return Ok(Reply::empty(status.status_code()).headers(pagination.headers()));
        }

        let items: Vec<JsonValue> = if options.as_table {
            items.iter().flat_map(flatten).map(JsonValue::Object).collect()
        } else {
            items.into_iter().map(JsonValue::Object).collect()
        };

        let mut body = Map::new();
        body.insert(model.collection_key(), JsonValue::Array(items));
        let mut reply = Reply::empty(status.status_code()).headers(pagination.headers());
        if !options.no_links {
            let meta = navigation(path, args, &self.arguments, &pagination, limit);
            reply = reply.header(header::LINK, &navigation_link_header(&meta));
            body.insert("_meta".to_string(), JsonValue::Object(meta));
        }
        reply.body = Body::Json(JsonValue::Object(body));
        Ok(self.conditional_read(reply, headers))
    }

    /// Single-resource reply in the canonical representation
    fn item_reply(&self, record: &Record, status: StatusCode, location: bool) -> Reply {
        let body = JsonValue::Object(self.model.to_dict(self.registry, record, false, true));
        let tag = etag(&body);
        let mut reply = Reply::json(status, body).header(
            header::LINK,
            &resource_link_header(&self.model.links(record)),
        );
        if let Some(uri) = self.model.record_uri(record).filter(|_| location) {
            reply = reply.header(header::LOCATION, &uri);
        }
        if self.config.conditional_request_enabled {
            reply = reply.header(header::ETAG, &tag);
        }
        reply
    }

    /// Attach the ETag, or answer 304 when `If-None-Match` already has it
    fn conditional_read(&self, reply: Reply, headers: &HeaderMap) -> Reply {
        if !self.config.conditional_request_enabled {
            return reply;
        }
        let Body::Json(body) = &reply.body else {
            return reply;
        };
        let tag = etag(body);
        let cached = headers
            .get(header::IF_NONE_MATCH)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|candidate| etag_matches(candidate, &tag));
        if cached {
            return Reply::empty(StatusCode::NOT_MODIFIED).header(header::ETAG, &tag);
        }
        reply.header(header::ETAG, &tag)
    }

    /// `If-Match` against the current canonical representation
    fn check_precondition(&self, headers: &HeaderMap, current: &Record) -> Result<(), ApiError> {
        if !self.config.conditional_request_enabled {
            return Ok(());
        }
        let tag = etag(&JsonValue::Object(
            self.model.to_dict(self.registry, current, false, true),
        ));
        let Some(candidate) = headers.get(header::IF_MATCH) else {
            tracing::warn!(resource = %self.model.name(), "Write without If-Match");
            return Err(ApiError::PreconditionRequired);
        };
        if etag_matches_strong(candidate.to_str().unwrap_or_default(), &tag) {
            Ok(())
        } else {
            Err(ApiError::PreconditionFailed)
        }
    }
}

fn is_blank(body: &[u8]) -> bool {
    body.iter().all(u8::is_ascii_whitespace)
}

/// Request body as a JSON object
fn json_object(body: &[u8]) -> Result<Map<String, JsonValue>, ApiError> {
    if is_blank(body) {
        return Err(ApiError::bad_request("Request body is empty"));
    }
    match serde_json::from_slice::<JsonValue>(body) {
        Ok(JsonValue::Object(data)) if data.is_empty() => {
            Err(ApiError::bad_request("Request body is empty"))
        }
        Ok(JsonValue::Object(data)) => Ok(data),
        Ok(_) => Err(ApiError::bad_request("Request body must be a JSON object")),
        Err(e) => Err(ApiError::bad_request(format!("Malformed JSON: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_must_be_an_object() {
        assert!(json_object(b"{\"a\": 1}").is_ok());
        for body in [&b""[..], b"  \n", b"{}", b"[1]", b"{oops"] {
            let err = json_object(body).unwrap_err();
            assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        }
    }

    #[test]
    fn blank_bodies() {
        assert!(is_blank(b""));
        assert!(is_blank(b" \r\n\t"));
        assert!(!is_blank(b"{}"));
    }
}
