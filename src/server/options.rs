use serde::Deserialize;

/// Configuration of the request pipeline.
///
/// ```
/// use scoped_injector::server::ServerOptions;
///
/// let options = ServerOptions::from_json(r#"{ "routePrefix": "/api" }"#).unwrap();
/// assert_eq!("/api", options.route_prefix);
/// assert_eq!(302, options.default_redirect_status);
/// assert!(!options.expose_error_details);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerOptions {
    /// Prepended to every route.
    pub route_prefix: String,
    /// Include the error message in the body of 500 responses.
    pub expose_error_details: bool,
    /// The status of redirects that do not set one.
    pub default_redirect_status: u16,
}

impl ServerOptions {
    /// Reads options from JSON. Missing fields keep their defaults.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    /// Joins the prefix, a controller route and an action route into a full
    /// route starting with `/`.
    #[must_use]
    pub fn route(&self, controller: &str, action: &str) -> String {
        let segments: Vec<_> = [self.route_prefix.as_str(), controller, action]
            .iter()
            .flat_map(|part| part.split('/'))
            .filter(|segment| !segment.is_empty())
            .collect();
        format!("/{}", segments.join("/"))
    }
}

impl Default for ServerOptions {
    fn default() -> Self {
        ServerOptions {
            route_prefix: String::new(),
            expose_error_details: false,
            default_redirect_status: 302,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ServerOptions;

    #[test]
    fn routes_are_joined_without_duplicate_slashes() {
        let options = ServerOptions {
            route_prefix: String::from("/api/"),
            ..ServerOptions::default()
        };

        assert_eq!("/api/users/:id", options.route("/users/", "/:id"));
        assert_eq!("/api", options.route("", "/"));
        assert_eq!("/", ServerOptions::default().route("/", ""));
    }
}
