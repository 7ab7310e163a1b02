//! Query-string vocabulary.
//!
//! [`Grammar`] holds the token literals a single filter value may carry and
//! [`Arguments`] the reserved query-string keys. Both are plain data so an
//! application can swap a literal (e.g. a `,` separator) without touching the
//! compiler.

/// Token literals recognized inside filter values
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grammar {
    pub separator: &'static str,
    pub negate: &'static str,
    pub reverse: &'static str,
    pub null: &'static str,
    pub like: &'static str,
    pub not_like: &'static str,
    pub escape: char,
    pub gt: &'static str,
    pub gte: &'static str,
    pub lt: &'static str,
    pub lte: &'static str,
    pub range_start: &'static str,
    pub range_end: &'static str,
    pub not_range_start: &'static str,
}

impl Default for Grammar {
    fn default() -> Self {
        Self {
            separator: ";",
            negate: "!",
            reverse: "-",
            null: "null",
            like: "%",
            not_like: "!%",
            escape: '\\',
            gt: "__gt__",
            gte: "__gte__",
            lt: "__lt__",
            lte: "__lte__",
            range_start: "(",
            range_end: ")",
            not_range_start: "!(",
        }
    }
}

impl Grammar {
    /// Split a list value, dropping empty items (`a;;b` is `a`, `b`)
    pub fn split<'a>(&self, value: &'a str) -> Vec<&'a str> {
        value
            .split(self.separator)
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .collect()
    }

    /// Escape LIKE metacharacters so a literal value matches verbatim
    #[must_use]
    pub fn escape_like(&self, value: &str) -> String {
        let mut escaped = String::with_capacity(value.len());
        for c in value.chars() {
            if c == '%' || c == '_' || c == self.escape {
                escaped.push(self.escape);
            }
            escaped.push(c);
        }
        escaped
    }
}

/// Reserved query-string keys
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Arguments {
    pub page: &'static str,
    pub limit: &'static str,
    pub export: &'static str,
    pub sort: &'static str,
    pub fields: &'static str,
    pub related: &'static str,
    pub extended: &'static str,
    pub as_table: &'static str,
    pub no_links: &'static str,
    pub search: &'static str,
    pub method: &'static str,
}

impl Default for Arguments {
    fn default() -> Self {
        Self {
            page: "_page",
            limit: "_limit",
            export: "_export",
            sort: "_sort",
            fields: "_fields",
            related: "_related",
            extended: "_extended",
            as_table: "_as_table",
            no_links: "_no_links",
            search: "_search",
            method: "_method",
        }
    }
}

impl Arguments {
    /// Keys the filter compiler leaves to other stages
    #[must_use]
    pub fn is_scalar(&self, key: &str) -> bool {
        [
            self.page,
            self.limit,
            self.export,
            self.related,
            self.extended,
            self.as_table,
            self.no_links,
            self.search,
            self.method,
        ]
        .contains(&key)
    }

    #[must_use]
    pub fn is_reserved(&self, key: &str) -> bool {
        self.is_scalar(key) || key == self.sort || key == self.fields
    }

    #[must_use]
    pub fn is_pagination(&self, key: &str) -> bool {
        key == self.page || key == self.limit
    }
}
