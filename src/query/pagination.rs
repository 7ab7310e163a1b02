use crate::grammar::Arguments;
use axum::http::{HeaderMap, HeaderValue, StatusCode};

/// How a requested page relates to the available pages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageStatus {
    /// The last page (or the only one): 200
    Complete,
    /// More pages follow: 206
    Partial,
    /// Past the last page: 204
    Beyond,
}

impl PageStatus {
    #[must_use]
    pub fn status_code(self) -> StatusCode {
        match self {
            Self::Complete => StatusCode::OK,
            Self::Partial => StatusCode::PARTIAL_CONTENT,
            Self::Beyond => StatusCode::NO_CONTENT,
        }
    }
}

/// Page bounds plus the totals of the filtered result set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    /// 1-based
    pub page: u64,
    pub page_size: u64,
    pub total: u64,
    pub page_count: u64,
}

impl Pagination {
    /// Without a limit the whole result set is one page
    #[must_use]
    pub fn new(page: u64, limit: Option<u64>, total: u64) -> Self {
        let page_size = limit.unwrap_or(total);
        let page_count = if page_size == 0 {
            0
        } else {
            total.div_ceil(page_size)
        };
        Self {
            page: page.max(1),
            page_size,
            total,
            page_count,
        }
    }

    #[must_use]
    pub fn offset(&self) -> u64 {
        (self.page - 1).saturating_mul(self.page_size)
    }

    /// An empty result set still has one (empty, complete) first page
    #[must_use]
    pub fn status(&self) -> PageStatus {
        if self.page > self.page_count.max(1) {
            PageStatus::Beyond
        } else if self.page < self.page_count {
            PageStatus::Partial
        } else {
            PageStatus::Complete
        }
    }

    #[must_use]
    pub fn has_prev(&self) -> bool {
        self.page > 1 && self.page <= self.page_count.max(1)
    }

    #[must_use]
    pub fn has_next(&self) -> bool {
        self.page < self.page_count
    }

    /// `Pagination-Count`, `Pagination-Page`, `Pagination-Num-Pages` and
    /// `Pagination-Page-Size`
    #[must_use]
    pub fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in [
            ("pagination-count", self.total),
            ("pagination-page", self.page),
            ("pagination-num-pages", self.page_count),
            ("pagination-page-size", self.page_size),
        ] {
            headers.insert(name, HeaderValue::from(value));
        }
        headers
    }
}

fn positive(value: &str) -> Option<u64> {
    value.trim().parse::<u64>().ok().filter(|v| *v > 0)
}

/// Read `_page` and `_limit` from query arguments.
///
/// Non-numeric and non-positive values are reported by argument name in the
/// returned invalid list. With `max_limit` set the limit defaults to it and
/// never exceeds it; without one an absent limit means "everything".
#[must_use]
pub fn get_pagination(
    args: &[(String, String)],
    arguments: &Arguments,
    max_limit: Option<u64>,
) -> (u64, Option<u64>, Vec<String>) {
    let mut invalid = Vec::new();
    let value_of = |key: &str| args.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str());

    let page = match value_of(arguments.page) {
        None => 1,
        Some(raw) => positive(raw).unwrap_or_else(|| {
            invalid.push(arguments.page.to_string());
            1
        }),
    };

    let requested = match value_of(arguments.limit) {
        None => None,
        Some(raw) => {
            let parsed = positive(raw);
            if parsed.is_none() {
                invalid.push(arguments.limit.to_string());
            }
            parsed
        }
    };

    let limit = match (requested, max_limit) {
        (Some(limit), Some(max)) => Some(limit.min(max)),
        (None, Some(max)) => Some(max),
        (limit, None) => limit,
    };

    (page, limit, invalid)
}
