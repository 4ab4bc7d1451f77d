use actix_web::{
    cookie::{time::Duration, Cookie},
    http::{header, StatusCode},
    web::{Bytes, Query},
    HttpRequest, HttpResponse,
};
use parking_lot::Mutex;
use scoped_injector::server::{ContextValue, CookieOptions};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// A snapshot of an actix-web request and the response being assembled for
/// it.
///
/// [`HttpRequest`] cannot cross threads, so everything the pipeline may read
/// is copied out of it before the request is dispatched.
#[derive(Debug)]
pub struct ActixContext {
    method: String,
    url: String,
    path: String,
    query: HashMap<String, String>,
    headers: HashMap<String, String>,
    cookies: HashMap<String, String>,
    body: ContextValue,
    pub(crate) params: Mutex<HashMap<String, String>>,
    pub(crate) state: Mutex<HashMap<String, ContextValue>>,
    pub(crate) response: Mutex<ResponseParts>,
}

/// The parts of a response written by the pipeline.
#[derive(Debug)]
pub(crate) struct ResponseParts {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub cookies: Vec<Cookie<'static>>,
    pub body: ResponseBody,
}

#[derive(Debug)]
pub(crate) enum ResponseBody {
    Empty,
    Text(String),
    Json(String),
    File(Vec<u8>),
}

impl Default for ResponseParts {
    fn default() -> Self {
        ResponseParts {
            status: 200,
            headers: Vec::new(),
            cookies: Vec::new(),
            body: ResponseBody::Empty,
        }
    }
}

impl ActixContext {
    /// Copies a request and its body.
    #[must_use]
    pub fn new(request: &HttpRequest, body: &Bytes) -> Self {
        let query = Query::<HashMap<String, String>>::from_query(request.query_string())
            .map(Query::into_inner)
            .unwrap_or_default();

        let headers = request
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                let value = value.to_str().ok()?;
                Some((name.as_str().to_owned(), value.to_owned()))
            })
            .collect();

        let cookies = request
            .cookies()
            .map(|cookies| {
                cookies
                    .iter()
                    .map(|cookie| (cookie.name().to_owned(), cookie.value().to_owned()))
                    .collect()
            })
            .unwrap_or_default();

        ActixContext {
            method: request.method().as_str().to_owned(),
            url: request.uri().to_string(),
            path: request.path().to_owned(),
            query,
            headers,
            cookies,
            body: parse_body(request, body),
            params: Mutex::default(),
            state: Mutex::default(),
            response: Mutex::default(),
        }
    }

    /// The request method.
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// The request path, without the query string.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    pub(crate) fn url(&self) -> &str {
        &self.url
    }

    pub(crate) fn body(&self) -> &ContextValue {
        &self.body
    }

    pub(crate) fn query(&self, key: Option<&str>) -> ContextValue {
        match key {
            Some(key) => text(self.query.get(key)),
            None => ContextValue::Json(Value::Object(
                self.query
                    .iter()
                    .map(|(key, value)| (key.clone(), Value::from(value.as_str())))
                    .collect::<Map<_, _>>(),
            )),
        }
    }

    pub(crate) fn header(&self, name: &str) -> ContextValue {
        text(self.headers.get(&name.to_ascii_lowercase()))
    }

    pub(crate) fn cookie(&self, name: &str) -> ContextValue {
        text(self.cookies.get(name))
    }

    pub(crate) fn param(&self, name: &str) -> ContextValue {
        text(self.params.lock().get(name))
    }

    /// Builds the response written so far.
    pub(crate) fn take_response(&self) -> HttpResponse {
        let parts = std::mem::take(&mut *self.response.lock());
        let status = StatusCode::from_u16(parts.status)
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let mut builder = HttpResponse::build(status);
        let has_content_type = parts
            .headers
            .iter()
            .any(|(name, _)| name.eq_ignore_ascii_case(header::CONTENT_TYPE.as_str()));
        for (name, value) in parts.headers {
            builder.append_header((name, value));
        }
        for cookie in parts.cookies {
            builder.cookie(cookie);
        }

        match parts.body {
            ResponseBody::Empty => builder.finish(),
            ResponseBody::Text(text) => builder.body(text),
            ResponseBody::Json(json) => {
                if !has_content_type {
                    builder.content_type("application/json");
                }
                builder.body(json)
            }
            ResponseBody::File(contents) => {
                if !has_content_type {
                    builder.content_type("application/octet-stream");
                }
                builder.body(contents)
            }
        }
    }
}

pub(crate) fn response_cookie(
    name: &str,
    value: String,
    options: Option<&CookieOptions>,
) -> Cookie<'static> {
    let mut cookie = Cookie::new(name.to_owned(), value);
    if let Some(options) = options {
        if let Some(max_age) = options.max_age {
            cookie.set_max_age(Duration::seconds(max_age));
        }
        if let Some(path) = &options.path {
            cookie.set_path(path.clone());
        }
        if let Some(domain) = &options.domain {
            cookie.set_domain(domain.clone());
        }
        cookie.set_http_only(options.http_only);
        cookie.set_secure(options.secure);
    }
    cookie
}

fn parse_body(request: &HttpRequest, body: &Bytes) -> ContextValue {
    if body.is_empty() {
        return ContextValue::Null;
    }

    let is_json = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map_or(false, |value| value.starts_with("application/json"));
    if is_json {
        if let Ok(json) = serde_json::from_slice(body) {
            return ContextValue::Json(json);
        }
    }

    ContextValue::text(String::from_utf8_lossy(body))
}

fn text(value: Option<&String>) -> ContextValue {
    value.map_or(ContextValue::Null, |value| ContextValue::text(value.as_str()))
}
