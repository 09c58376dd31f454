//! Document routes.
//!
//! A route is the key under which connections subscribe and changes are
//! broadcast. The hub compares routes by their canonical string and never
//! normalizes them; callers hand in canonical routes.

use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

/// Maximum route length accepted by [`validate_route`].
pub const MAX_ROUTE_LENGTH: usize = 1024;

/// Canonical identifier of a document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Route(Arc<str>);

impl Route {
    /// Create a route from its canonical string.
    #[must_use]
    pub fn new(route: impl AsRef<str>) -> Self {
        Self(Arc::from(route.as_ref()))
    }

    /// Validate and create a route from untrusted input.
    ///
    /// # Errors
    ///
    /// Returns a description of the problem if the route is not acceptable.
    pub fn parse(route: &str) -> Result<Self, &'static str> {
        validate_route(route)?;
        Ok(Self::new(route))
    }

    /// Get the route as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Iterate over the non-empty path segments of the route.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|s| !s.is_empty())
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Route {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Route {
    fn from(s: String) -> Self {
        Self(Arc::from(s))
    }
}

impl Borrow<str> for Route {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Validate a route received from outside the process.
///
/// The hub itself accepts any route; this check belongs to the edges that
/// turn client input into routes (and, in the server, into file paths).
///
/// # Errors
///
/// Returns an error message if the route is invalid.
pub fn validate_route(route: &str) -> Result<(), &'static str> {
    if route.is_empty() {
        return Err("Route cannot be empty");
    }
    if !route.starts_with('/') {
        return Err("Route must start with '/'");
    }
    if route.len() > MAX_ROUTE_LENGTH {
        return Err("Route too long");
    }
    if !route.chars().all(|c| c.is_ascii() && !c.is_ascii_control()) {
        return Err("Route contains invalid characters");
    }
    if route.split('/').any(|segment| segment == "..") {
        return Err("Route cannot contain '..' segments");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_equality_is_exact() {
        assert_eq!(Route::new("/docs/a"), Route::from("/docs/a"));
        assert_ne!(Route::new("/docs/a"), Route::new("/docs/a/"));
        assert_ne!(Route::new("/docs/a"), Route::new("/Docs/a"));
    }

    #[test]
    fn test_route_segments() {
        let route = Route::new("/docs//guide/intro");
        let segments: Vec<_> = route.segments().collect();
        assert_eq!(segments, vec!["docs", "guide", "intro"]);
    }

    #[test]
    fn test_route_validation() {
        assert!(validate_route("/").is_ok());
        assert!(validate_route("/docs/a").is_ok());
        assert!(validate_route("").is_err());
        assert!(validate_route("docs/a").is_err());
        assert!(validate_route("/docs/../secret").is_err());
        assert!(validate_route("/docs/\u{7}").is_err());

        let long = format!("/{}", "a".repeat(MAX_ROUTE_LENGTH));
        assert!(validate_route(&long).is_err());
    }

    #[test]
    fn test_route_parse() {
        assert_eq!(Route::parse("/docs/a").unwrap().as_str(), "/docs/a");
        assert!(Route::parse("relative").is_err());
    }
}
