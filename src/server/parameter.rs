use crate::{
    server::{
        ActionMetadata, ContextItem, ContextValue, ControllerMetadata,
        HandlerResult, HttpException, RequestContext,
    },
    Service, Svc,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::{
    fmt::{Debug, Formatter},
    sync::Arc,
};

type ProvideFn =
    Arc<dyn Fn(&RequestContext) -> HandlerResult<ContextValue> + Send + Sync>;
type TransformFn = Arc<
    dyn Fn(ContextValue, &TransformContext<'_>) -> HandlerResult<ContextValue>
        + Send
        + Sync,
>;

/// Extracts the value of an action parameter from a request.
#[derive(Clone)]
pub struct ValueProvider {
    description: Arc<str>,
    provide: ProvideFn,
}

impl ValueProvider {
    /// A provider running a custom function.
    pub fn custom<F>(description: impl AsRef<str>, provide: F) -> Self
    where
        F: Fn(&RequestContext) -> HandlerResult<ContextValue>
            + Send
            + Sync
            + 'static,
    {
        ValueProvider {
            description: Arc::from(description.as_ref()),
            provide: Arc::new(provide),
        }
    }

    fn item(kind: ContextItem, key: Option<&str>, description: String) -> Self {
        let key = key.map(String::from);
        ValueProvider::custom(description, move |context| {
            Ok(context.get(kind, key.as_deref()))
        })
    }

    /// A route parameter.
    #[must_use]
    pub fn route_param(name: &str) -> Self {
        ValueProvider::item(
            ContextItem::Parameter,
            Some(name),
            format!("route parameter {}", name),
        )
    }

    /// A query parameter.
    #[must_use]
    pub fn query(name: &str) -> Self {
        ValueProvider::item(
            ContextItem::Query,
            Some(name),
            format!("query parameter {}", name),
        )
    }

    /// The whole request body.
    #[must_use]
    pub fn body() -> Self {
        ValueProvider::item(ContextItem::Body, None, String::from("body"))
    }

    /// A field of a JSON request body.
    #[must_use]
    pub fn body_field(name: &str) -> Self {
        let field = String::from(name);
        ValueProvider::custom(format!("body field {}", name), move |context| {
            let value = match context.body() {
                ContextValue::Json(Value::Object(mut fields)) => {
                    fields.remove(&field).map_or(ContextValue::Null, ContextValue::Json)
                }
                _ => ContextValue::Null,
            };
            Ok(value)
        })
    }

    /// A request header.
    #[must_use]
    pub fn header(name: &str) -> Self {
        ValueProvider::item(
            ContextItem::Header,
            Some(name),
            format!("header {}", name),
        )
    }

    /// A request cookie.
    #[must_use]
    pub fn cookie(name: &str) -> Self {
        ValueProvider::item(
            ContextItem::Cookie,
            Some(name),
            format!("cookie {}", name),
        )
    }

    /// An entry of the request state.
    #[must_use]
    pub fn request_state(key: &str) -> Self {
        ValueProvider::item(
            ContextItem::RequestState,
            Some(key),
            format!("request state {}", key),
        )
    }

    /// The [`RequestContext`] itself, as a native value.
    #[must_use]
    pub fn context() -> Self {
        ValueProvider::custom("context", |context| {
            Ok(ContextValue::Native(Svc::new(context.clone())))
        })
    }

    /// What the provider extracts.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    pub(crate) fn provide(&self, context: &RequestContext) -> HandlerResult<ContextValue> {
        (self.provide)(context)
    }
}

impl Debug for ValueProvider {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ValueProvider").field(&self.description).finish()
    }
}

/// What a transformer knows about the value it transforms.
#[derive(Debug)]
pub struct TransformContext<'a> {
    /// The request.
    pub context: &'a RequestContext,
    /// The name of the action.
    pub action: &'a str,
    /// The index of the parameter.
    pub index: usize,
    /// The parameter.
    pub parameter: &'a ParameterMetadata,
}

/// Post-processes bound parameter values. Transformers of a parameter run
/// in ascending priority, merged from the controller, the action and the
/// parameter itself.
#[derive(Clone)]
pub struct Transformer {
    priority: i32,
    transform: TransformFn,
}

impl Transformer {
    /// Creates a transformer.
    pub fn new<F>(priority: i32, transform: F) -> Self
    where
        F: Fn(ContextValue, &TransformContext<'_>) -> HandlerResult<ContextValue>
            + Send
            + Sync
            + 'static,
    {
        Transformer {
            priority,
            transform: Arc::new(transform),
        }
    }

    /// Rejects missing values with 400 Bad Request.
    #[must_use]
    pub fn required(priority: i32) -> Self {
        Transformer::new(priority, |value, info| {
            if value.is_null() {
                Err(HttpException::bad_request(format!(
                    "Missing {}",
                    info.parameter.provider().description()
                ))
                .into())
            } else {
                Ok(value)
            }
        })
    }

    /// Trims surrounding whitespace from strings.
    #[must_use]
    pub fn trim(priority: i32) -> Self {
        Transformer::new(priority, |value, _| {
            Ok(match value.as_str() {
                Some(text) => ContextValue::text(text.trim()),
                None => value,
            })
        })
    }

    /// The priority of the transformer.
    #[must_use]
    pub fn priority(&self) -> i32 {
        self.priority
    }

    fn apply(
        &self,
        value: ContextValue,
        context: &TransformContext<'_>,
    ) -> HandlerResult<ContextValue> {
        (self.transform)(value, context)
    }
}

impl Debug for Transformer {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transformer")
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

/// How an action parameter is bound.
#[derive(Clone, Debug)]
pub struct ParameterMetadata {
    provider: ValueProvider,
    transformers: Vec<Transformer>,
}

impl ParameterMetadata {
    /// Binds a parameter with a value provider.
    #[must_use]
    pub fn new(provider: ValueProvider) -> Self {
        ParameterMetadata {
            provider,
            transformers: Vec::new(),
        }
    }

    /// Adds a transformer of this parameter.
    #[must_use]
    pub fn transformer(mut self, transformer: Transformer) -> Self {
        self.transformers.push(transformer);
        self
    }

    /// The value provider.
    #[must_use]
    pub fn provider(&self) -> &ValueProvider {
        &self.provider
    }
}

impl From<ValueProvider> for ParameterMetadata {
    fn from(provider: ValueProvider) -> Self {
        ParameterMetadata::new(provider)
    }
}

/// The bound parameters of an action, in declaration order.
#[derive(Clone, Debug, Default)]
pub struct ActionArguments {
    values: Arc<[ContextValue]>,
}

impl ActionArguments {
    /// Wraps bound values.
    #[must_use]
    pub fn new(values: Vec<ContextValue>) -> Self {
        ActionArguments {
            values: values.into(),
        }
    }

    /// The number of values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether there are no values.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The value at `index`. Missing values are null.
    #[must_use]
    pub fn get(&self, index: usize) -> &ContextValue {
        const NULL: &ContextValue = &ContextValue::Null;
        self.values.get(index).unwrap_or(NULL)
    }

    /// The value at `index` as text.
    #[must_use]
    pub fn text(&self, index: usize) -> Option<&str> {
        self.get(index).as_str()
    }

    /// The value at `index` deserialized into a `T`. Values that fail to
    /// deserialize are rejected with 400 Bad Request.
    pub fn json<T: DeserializeOwned>(&self, index: usize) -> HandlerResult<T> {
        self.get(index).deserialize().map_err(|error| {
            HttpException::bad_request(format!(
                "Invalid parameter {}: {}",
                index, error
            ))
            .into()
        })
    }

    /// The native value at `index`.
    #[must_use]
    pub fn native<T: Service>(&self, index: usize) -> Option<Svc<T>> {
        self.get(index).as_native()
    }
}

/// Binds the parameters of an action from a request.
pub(crate) fn bind_parameters(
    controller: &ControllerMetadata,
    action: &ActionMetadata,
    context: &RequestContext,
) -> HandlerResult<ActionArguments> {
    let mut values = Vec::with_capacity(action.parameters().len());
    for (index, parameter) in action.parameters().iter().enumerate() {
        let mut value = parameter.provider.provide(context)?;

        let mut transformers: Vec<_> = controller
            .transformers()
            .iter()
            .chain(action.transformers())
            .chain(&parameter.transformers)
            .collect();
        transformers.sort_by_key(|transformer| transformer.priority);

        let info = TransformContext {
            context,
            action: action.name(),
            index,
            parameter,
        };
        for transformer in transformers {
            value = transformer.apply(value, &info)?;
        }
        values.push(value);
    }

    Ok(ActionArguments::new(values))
}
