//! Response shaping: bodies, ETags, `Link` headers, pagination navigation,
//! table flattening and CSV export.

use crate::errors::ApiError;
use crate::grammar::Arguments;
use crate::query::Pagination;
use axum::{
    Json,
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::{Map, Value as JsonValue};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Empty,
    Json(JsonValue),
    Csv(Vec<u8>),
}

/// A rendered outcome of one service call
#[derive(Debug, Clone)]
pub struct Reply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Body,
}

impl Reply {
    #[must_use]
    pub fn json(status: StatusCode, body: JsonValue) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Body::Json(body),
        }
    }

    #[must_use]
    pub fn empty(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Body::Empty,
        }
    }

    /// Add a header; values that are not valid header text are skipped
    #[must_use]
    pub fn header(mut self, name: HeaderName, value: &str) -> Self {
        match HeaderValue::from_str(value) {
            Ok(value) => {
                self.headers.insert(name, value);
            }
            Err(_) => tracing::warn!(header = %name, "Dropped unrepresentable header value"),
        }
        self
    }

    #[must_use]
    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers.extend(headers);
        self
    }

    /// The ETag this reply carries, if any
    #[must_use]
    pub fn etag(&self) -> Option<&str> {
        self.headers
            .get(header::ETAG)
            .and_then(|v| v.to_str().ok())
    }

    /// Keep status and headers, drop the body (HEAD)
    #[must_use]
    pub fn without_body(mut self) -> Self {
        self.body = Body::Empty;
        self
    }
}

impl IntoResponse for Reply {
    fn into_response(self) -> Response {
        let mut response = match self.body {
            Body::Empty => self.status.into_response(),
            Body::Json(body) => (self.status, Json(body)).into_response(),
            Body::Csv(data) => (
                self.status,
                [(header::CONTENT_TYPE, "text/csv; charset=utf-8")],
                data,
            )
                .into_response(),
        };
        response.headers_mut().extend(self.headers);
        response
    }
}

/// Strong ETag over the canonical JSON serialization of a body
#[must_use]
pub fn etag(body: &JsonValue) -> String {
    let bytes = serde_json::to_vec(body).unwrap_or_default();
    format!("\"{}\"", hex::encode(Sha256::digest(&bytes)))
}

/// Weak comparison for `If-None-Match`.
///
/// Accepts lists, weak validators and unquoted tags; `*` matches any
/// existing representation.
#[must_use]
pub fn etag_matches(header: &str, current: &str) -> bool {
    matches_any(header, current, true)
}

/// Strong comparison for `If-Match`: weak validators never match
#[must_use]
pub fn etag_matches_strong(header: &str, current: &str) -> bool {
    matches_any(header, current, false)
}

fn matches_any(header: &str, current: &str, weak: bool) -> bool {
    let current = current.trim_matches('"');
    header.split(',').map(str::trim).any(|candidate| {
        if candidate == "*" {
            return true;
        }
        let opaque = match candidate.strip_prefix("W/") {
            Some(_) if !weak => return false,
            Some(rest) => rest,
            None => candidate,
        };
        opaque.trim_matches('"') == current
    })
}

/// `<url>; rel=name` pairs joined for a `Link` header
#[must_use]
pub fn link_header<'a>(links: impl IntoIterator<Item = (&'a str, &'a str)>) -> String {
    links
        .into_iter()
        .map(|(url, rel)| format!("<{url}>; rel={rel}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// `self` plus every relation of a single resource, as a `Link` header
#[must_use]
pub fn resource_link_header(links: &Map<String, JsonValue>) -> String {
    let self_link = links
        .get("self")
        .and_then(JsonValue::as_str)
        .map(|url| (url, "self"));
    let related = links
        .iter()
        .filter(|(name, _)| name.as_str() != "self")
        .filter_map(|(_, url)| url.as_str())
        .map(|url| (url, "related"));
    link_header(self_link.into_iter().chain(related))
}

/// First/prev/next/last page URLs; absent neighbours are `null`.
///
/// Every argument other than the page bounds is carried over unchanged.
#[must_use]
pub fn navigation(
    path: &str,
    args: &[(String, String)],
    arguments: &Arguments,
    pagination: &Pagination,
    limit: Option<u64>,
) -> Map<String, JsonValue> {
    let url_for = |page: u64| {
        let mut query = url::form_urlencoded::Serializer::new(String::new());
        for (key, value) in args.iter().filter(|(k, _)| !arguments.is_pagination(k)) {
            query.append_pair(key, value);
        }
        query.append_pair(arguments.page, &page.to_string());
        if let Some(limit) = limit {
            query.append_pair(arguments.limit, &limit.to_string());
        }
        JsonValue::String(format!("{path}?{}", query.finish()))
    };

    let last = pagination.page_count.max(1);
    let mut meta = Map::new();
    meta.insert("first".into(), url_for(1));
    meta.insert(
        "prev".into(),
        if pagination.has_prev() {
            url_for(pagination.page - 1)
        } else {
            JsonValue::Null
        },
    );
    meta.insert(
        "next".into(),
        if pagination.has_next() {
            url_for(pagination.page + 1)
        } else {
            JsonValue::Null
        },
    );
    meta.insert("last".into(), url_for(last));
    meta
}

/// `Link` header form of [`navigation`]
#[must_use]
pub fn navigation_link_header(meta: &Map<String, JsonValue>) -> String {
    link_header(
        ["first", "prev", "next", "last"]
            .into_iter()
            .filter_map(|rel| meta.get(rel).and_then(JsonValue::as_str).map(|url| (url, rel))),
    )
}

/// Denormalize one rendered item into flat rows.
///
/// Nested objects become `<key>.<field>` columns; every array multiplies the
/// rows by its length, an empty array leaves a single row. `_links` is
/// dropped at every level.
#[must_use]
pub fn flatten(item: &Map<String, JsonValue>) -> Vec<Map<String, JsonValue>> {
    let mut rows = vec![Map::new()];
    for (key, value) in item {
        if key == "_links" {
            continue;
        }
        match value {
            JsonValue::Object(nested) => {
                for row in &mut rows {
                    prefix_into(row, key, nested);
                }
            }
            JsonValue::Array(children) if !children.is_empty() => {
                let mut multiplied = Vec::with_capacity(rows.len() * children.len());
                for row in &rows {
                    for child in children {
                        let mut row = row.clone();
                        match child {
                            JsonValue::Object(nested) => prefix_into(&mut row, key, nested),
                            scalar => {
                                row.insert(key.clone(), scalar.clone());
                            }
                        }
                        multiplied.push(row);
                    }
                }
                rows = multiplied;
            }
            JsonValue::Array(_) => {}
            scalar => {
                for row in &mut rows {
                    row.insert(key.clone(), scalar.clone());
                }
            }
        }
    }
    rows
}

fn prefix_into(row: &mut Map<String, JsonValue>, prefix: &str, nested: &Map<String, JsonValue>) {
    for (field, value) in nested {
        if field == "_links" || value.is_object() || value.is_array() {
            continue;
        }
        row.insert(format!("{prefix}.{field}"), value.clone());
    }
}

fn cell(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => String::new(),
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Render flat rows as CSV with every field quoted.
///
/// Columns are the union of the rows' keys in first-seen order; a row
/// without a column gets an empty cell.
///
/// # Errors
/// [`ApiError::Internal`] when the writer fails or the delimiter is not a
/// single byte.
pub fn to_csv(
    rows: &[Map<String, JsonValue>],
    delimiter: char,
) -> Result<(Vec<u8>, usize), ApiError> {
    let delimiter = u8::try_from(delimiter)
        .map_err(|_| ApiError::internal("Export failed", Some(format!("delimiter {delimiter:?}"))))?;

    let mut columns: Vec<&str> = Vec::new();
    for row in rows {
        for key in row.keys() {
            if !columns.contains(&key.as_str()) {
                columns.push(key);
            }
        }
    }

    let mut writer = csv::WriterBuilder::new()
        .delimiter(delimiter)
        .quote_style(csv::QuoteStyle::Always)
        .from_writer(Vec::new());
    let failed = |e: &dyn std::fmt::Display| ApiError::internal("Export failed", Some(e.to_string()));

    writer.write_record(&columns).map_err(|e| failed(&e))?;
    for row in rows {
        let record = columns
            .iter()
            .map(|c| row.get(*c).map(cell).unwrap_or_default());
        writer.write_record(record).map_err(|e| failed(&e))?;
    }
    let data = writer.into_inner().map_err(|e| failed(&e))?;
    Ok((data, columns.len()))
}

/// A CSV download reply with its export headers
///
/// # Errors
/// See [`to_csv`].
pub fn csv_reply(
    rows: &[Map<String, JsonValue>],
    filename: &str,
    delimiter: char,
) -> Result<Reply, ApiError> {
    let (data, columns) = to_csv(rows, delimiter)?;
    let reply = Reply {
        status: StatusCode::OK,
        headers: HeaderMap::new(),
        body: Body::Csv(data),
    };
    Ok(reply
        .header(
            header::CONTENT_DISPOSITION,
            &format!("attachment; filename={filename}.csv"),
        )
        .header(HeaderName::from_static("total-rows"), &rows.len().to_string())
        .header(HeaderName::from_static("total-columns"), &columns.to_string()))
}
