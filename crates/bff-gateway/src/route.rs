use axum::http::Uri;
use serde::Deserialize;
use std::collections::HashMap;

const ROUTE_SUFFIX: &str = "_API_URL";

/// How the query component is separated from the path in the inbound target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryMode {
    /// Split on `&`: the first piece is the path, the second is forwarded as
    /// the query, anything after a second `&` is dropped. This is what the
    /// deployed storefront client sends.
    #[default]
    Legacy,
    /// Split on the first `?`.
    Standard,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("no upstream configured for route segment {segment:?}")]
    Unresolved { segment: String },
    #[error("invalid upstream url {url:?}")]
    InvalidTarget { url: String },
}

/// Where one inbound request goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTarget {
    pub segment: String,
    pub base_url: String,
    pub suffix: String,
    pub query: Option<String>,
}

impl RouteTarget {
    /// `base + "/" + suffix + "?" + query`, omitting empty parts.
    pub fn url(&self) -> String {
        let mut url = self.base_url.clone();
        if !self.suffix.is_empty() {
            url.push('/');
            url.push_str(&self.suffix);
        }
        if let Some(query) = self.query.as_deref().filter(|q| !q.is_empty()) {
            url.push('?');
            url.push_str(query);
        }
        url
    }

    /// Parsed absolute URI. Only `http` and `https` targets with a host are accepted.
    pub fn uri(&self) -> Result<Uri, ResolveError> {
        let url = self.url();
        let invalid = || ResolveError::InvalidTarget { url: url.clone() };
        let uri: Uri = url.parse().map_err(|_| invalid())?;
        match (uri.scheme_str(), uri.host()) {
            (Some("http" | "https"), Some(host)) if !host.is_empty() => Ok(uri),
            _ => Err(invalid()),
        }
    }
}

/// Segment → base URL mapping built from `{SEGMENT}_API_URL` variables.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: HashMap<String, String>,
}

impl RouteTable {
    /// Snapshot of the process environment.
    pub fn from_env() -> Self {
        Self::from_vars(std::env::vars())
    }

    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let routes = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .filter(|(k, v)| k.ends_with(ROUTE_SUFFIX) && !v.is_empty())
            .collect();
        Self { routes }
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Configured variable names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.routes.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Map a raw request target (path plus whatever follows) to an upstream.
    pub fn resolve(&self, raw: &str, mode: QueryMode) -> Result<RouteTarget, ResolveError> {
        let (path, query) = split_target(raw, mode);
        let path = path.strip_prefix('/').unwrap_or(path);
        let (segment, suffix) = path.split_once('/').unwrap_or((path, ""));

        let var = format!("{}{}", segment.to_uppercase(), ROUTE_SUFFIX);
        let base_url = self
            .routes
            .get(&var)
            .ok_or_else(|| ResolveError::Unresolved {
                segment: segment.to_string(),
            })?;

        Ok(RouteTarget {
            segment: segment.to_string(),
            base_url: base_url.clone(),
            suffix: suffix.to_string(),
            query: query.map(str::to_string),
        })
    }
}

fn split_target(raw: &str, mode: QueryMode) -> (&str, Option<&str>) {
    match mode {
        QueryMode::Legacy => {
            let mut parts = raw.split('&');
            let path = parts.next().unwrap_or_default();
            (path, parts.next())
        }
        QueryMode::Standard => match raw.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (raw, None),
        },
    }
}
