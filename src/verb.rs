use axum::http::{HeaderMap, Method};
use std::fmt;
use std::str::FromStr;

/// Header that turns a POST into another verb for clients that cannot send
/// custom methods
pub const METHOD_OVERRIDE_HEADER: &str = "x-http-method-override";

/// The verbs a resource can answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Verb {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
    Fetch,
    Options,
}

impl Verb {
    pub const ALL: [Self; 8] = [
        Self::Get,
        Self::Head,
        Self::Post,
        Self::Put,
        Self::Patch,
        Self::Delete,
        Self::Fetch,
        Self::Options,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
            Self::Fetch => "FETCH",
            Self::Options => "OPTIONS",
        }
    }

    #[must_use]
    pub fn is_mutating(self) -> bool {
        matches!(self, Self::Post | Self::Put | Self::Patch | Self::Delete)
    }

    /// Normalize the request method, applying a POST override.
    ///
    /// Only POST may be overridden, and only to FETCH; other override values
    /// are ignored. `None` means the method is not one this crate serves.
    #[must_use]
    pub fn resolve(method: &Method, headers: &HeaderMap, override_flag: Option<&str>) -> Option<Self> {
        let verb: Self = method.as_str().parse().ok()?;
        if verb != Self::Post {
            return Some(verb);
        }
        let requested = headers
            .get(METHOD_OVERRIDE_HEADER)
            .and_then(|v| v.to_str().ok())
            .or(override_flag);
        match requested.map(str::parse::<Self>) {
            Some(Ok(Self::Fetch)) => Some(Self::Fetch),
            _ => Some(Self::Post),
        }
    }
}

impl FromStr for Verb {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|v| v.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unsupported method '{s}'"))
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn parses_custom_fetch_method() {
        let method = Method::from_bytes(b"FETCH").unwrap();
        assert_eq!(
            Verb::resolve(&method, &HeaderMap::new(), None),
            Some(Verb::Fetch)
        );
    }

    #[test]
    fn post_override_header_becomes_fetch() {
        let mut headers = HeaderMap::new();
        headers.insert(METHOD_OVERRIDE_HEADER, HeaderValue::from_static("FETCH"));
        assert_eq!(
            Verb::resolve(&Method::POST, &headers, None),
            Some(Verb::Fetch)
        );
    }

    #[test]
    fn post_override_flag_becomes_fetch() {
        assert_eq!(
            Verb::resolve(&Method::POST, &HeaderMap::new(), Some("fetch")),
            Some(Verb::Fetch)
        );
    }

    #[test]
    fn only_post_is_overridden() {
        let mut headers = HeaderMap::new();
        headers.insert(METHOD_OVERRIDE_HEADER, HeaderValue::from_static("DELETE"));
        assert_eq!(Verb::resolve(&Method::POST, &headers, None), Some(Verb::Post));
        assert_eq!(Verb::resolve(&Method::GET, &headers, None), Some(Verb::Get));
    }

    #[test]
    fn unknown_methods_are_rejected() {
        let method = Method::from_bytes(b"PURGE").unwrap();
        assert_eq!(Verb::resolve(&method, &HeaderMap::new(), None), None);
    }
}
