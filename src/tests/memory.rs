use crate::server::{
    ContextItem, ContextValue, CookieOptions, HttpContext, MiddlewareHandler,
    PlatformError, RouteDefinition, RouteHandler, ServerPlatform,
};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use std::{collections::HashMap, path::Path, sync::Arc};

/// A platform serving requests dispatched by the tests themselves.
#[derive(Default)]
pub(crate) struct MemoryPlatform {
    routes: RwLock<Vec<(RouteDefinition, RouteHandler)>>,
    middleware: RwLock<Vec<MiddlewareHandler>>,
}

pub(crate) struct MemoryRequest {
    method: String,
    url: String,
    query: HashMap<String, String>,
    headers: HashMap<String, String>,
    cookies: HashMap<String, String>,
    body: ContextValue,
    params: Mutex<HashMap<String, String>>,
    state: Mutex<HashMap<String, ContextValue>>,
    response: Mutex<MemoryResponse>,
}

#[derive(Clone, Debug)]
pub(crate) struct MemoryResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub cookies: Vec<(String, String)>,
    pub body: Option<String>,
}

impl Default for MemoryResponse {
    fn default() -> Self {
        MemoryResponse {
            status: 200,
            headers: HashMap::new(),
            cookies: Vec::new(),
            body: None,
        }
    }
}

impl MemoryResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

impl MemoryRequest {
    pub fn new(method: &str, url: &str) -> Self {
        let query = url
            .split_once('?')
            .map(|(_, query)| {
                query
                    .split('&')
                    .filter_map(|pair| pair.split_once('='))
                    .map(|(key, value)| (key.to_owned(), value.to_owned()))
                    .collect()
            })
            .unwrap_or_default();

        MemoryRequest {
            method: method.to_owned(),
            url: url.to_owned(),
            query,
            headers: HashMap::new(),
            cookies: HashMap::new(),
            body: ContextValue::Null,
            params: Mutex::default(),
            state: Mutex::default(),
            response: Mutex::default(),
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.to_owned());
        self
    }

    pub fn cookie(mut self, name: &str, value: &str) -> Self {
        self.cookies.insert(name.to_owned(), value.to_owned());
        self
    }

    pub fn body(mut self, body: Value) -> Self {
        self.body = ContextValue::Json(body);
        self
    }

    fn path(&self) -> &str {
        self.url.split('?').next().unwrap_or("/")
    }
}

impl MemoryPlatform {
    pub fn new() -> Arc<Self> {
        Arc::new(MemoryPlatform::default())
    }

    pub fn routes(&self) -> Vec<String> {
        self.routes
            .read()
            .iter()
            .map(|(route, _)| format!("{} {}", route.method, route.route))
            .collect()
    }

    pub async fn dispatch(&self, method: &str, url: &str) -> MemoryResponse {
        self.send(MemoryRequest::new(method, url)).await
    }

    pub async fn send(&self, request: MemoryRequest) -> MemoryResponse {
        let matched = self.routes.read().iter().find_map(|(route, handler)| {
            if !route.method.matches(&request.method) {
                return None;
            }
            match_route(&route.route, request.path())
                .map(|params| (params, handler.clone()))
        });
        let (params, handler) = match matched {
            Some(matched) => matched,
            None => {
                return MemoryResponse {
                    status: 404,
                    ..MemoryResponse::default()
                }
            }
        };

        *request.params.lock() = params;
        let request = Arc::new(request);
        let context = HttpContext::new(request.clone());

        let middleware = self.middleware.read().clone();
        for handler in middleware {
            if !handler(context.clone()).await {
                return request.response.lock().clone();
            }
        }

        handler(context).await;
        let response = request.response.lock();
        response.clone()
    }
}

fn match_route(route: &str, path: &str) -> Option<HashMap<String, String>> {
    let route: Vec<_> = route.split('/').filter(|s| !s.is_empty()).collect();
    let path: Vec<_> = path.split('/').filter(|s| !s.is_empty()).collect();
    if route.len() != path.len() {
        return None;
    }

    let mut params = HashMap::new();
    for (expected, actual) in route.iter().zip(&path) {
        match expected.strip_prefix(':') {
            Some(name) => {
                params.insert(name.to_owned(), (*actual).to_owned());
            }
            None if expected == actual => {}
            None => return None,
        }
    }
    Some(params)
}

fn request_of(context: &HttpContext) -> Result<&Arc<MemoryRequest>, PlatformError> {
    context
        .native::<Arc<MemoryRequest>>()
        .ok_or_else(|| PlatformError::new("not a memory request"))
}

fn text(value: Option<&String>) -> ContextValue {
    value.map_or(ContextValue::Null, |value| ContextValue::text(value.as_str()))
}

#[async_trait]
impl ServerPlatform for MemoryPlatform {
    fn add_route_handler(&self, route: RouteDefinition, handler: RouteHandler) {
        self.routes.write().push((route, handler));
    }

    fn add_middleware_handler(&self, handler: MiddlewareHandler) {
        self.middleware.write().push(handler);
    }

    fn get_context_item(
        &self,
        kind: ContextItem,
        context: &HttpContext,
        key: Option<&str>,
    ) -> ContextValue {
        let request = match request_of(context) {
            Ok(request) => request,
            Err(_) => return ContextValue::Null,
        };
        match (kind, key) {
            (ContextItem::Url, _) => ContextValue::text(request.url.as_str()),
            (ContextItem::Parameter, Some(key)) => text(request.params.lock().get(key)),
            (ContextItem::Query, Some(key)) => text(request.query.get(key)),
            (ContextItem::Query, None) => ContextValue::Json(Value::Object(
                request
                    .query
                    .iter()
                    .map(|(key, value)| (key.clone(), Value::from(value.as_str())))
                    .collect::<Map<_, _>>(),
            )),
            (ContextItem::Body, _) => request.body.clone(),
            (ContextItem::Cookie, Some(key)) => text(request.cookies.get(key)),
            (ContextItem::Header, Some(key)) => {
                text(request.headers.get(&key.to_ascii_lowercase()))
            }
            (ContextItem::State | ContextItem::RequestState, Some(key)) => {
                request.state.lock().get(key).cloned().unwrap_or_default()
            }
            (ContextItem::Request, _) => ContextValue::Native(request.clone()),
            _ => ContextValue::Null,
        }
    }

    fn set_context_item(
        &self,
        kind: ContextItem,
        context: &HttpContext,
        value: ContextValue,
        key: Option<&str>,
        _options: Option<&CookieOptions>,
    ) -> Result<(), PlatformError> {
        let request = request_of(context)?;
        match (kind, key) {
            (ContextItem::Status, _) => {
                let status = value
                    .as_json()
                    .and_then(Value::as_u64)
                    .and_then(|status| u16::try_from(status).ok())
                    .ok_or_else(|| PlatformError::new("invalid status"))?;
                request.response.lock().status = status;
            }
            (ContextItem::Header, Some(key)) => {
                let value = value.as_str().unwrap_or_default().to_owned();
                request.response.lock().headers.insert(key.to_owned(), value);
            }
            (ContextItem::Cookie, Some(key)) => {
                let value = value.as_str().unwrap_or_default().to_owned();
                request.response.lock().cookies.push((key.to_owned(), value));
            }
            (ContextItem::RequestState, Some(key)) => {
                request.state.lock().insert(key.to_owned(), value);
            }
            (ContextItem::Body, _) => {
                let body = match value {
                    ContextValue::Null => None,
                    ContextValue::Json(Value::String(text)) => Some(text),
                    ContextValue::Json(json) => {
                        request
                            .response
                            .lock()
                            .headers
                            .entry(String::from("Content-Type"))
                            .or_insert_with(|| String::from("application/json"));
                        Some(json.to_string())
                    }
                    ContextValue::Native(_) => {
                        return Err(PlatformError::new("native bodies are not supported"))
                    }
                };
                request.response.lock().body = body;
            }
            _ => return Err(PlatformError::new(format!("cannot write {:?}", kind))),
        }
        Ok(())
    }

    async fn send_file(
        &self,
        context: &HttpContext,
        path: &Path,
    ) -> Result<(), PlatformError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|error| PlatformError::new(error.to_string()))?;
        request_of(context)?.response.lock().body = Some(contents);
        Ok(())
    }
}
