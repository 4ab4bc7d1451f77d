use super::memory::{MemoryPlatform, MemoryRequest};
use crate::{
    define_module,
    server::{
        ActionArguments, ActionInvocation, ActionMetadata, ActionResult,
        ContentResult, ContextValue, ControllerMetadata, ErrorHandler, Filter,
        FilterRegistration, HandlerResult, HttpException, HttpMethod,
        Middleware, MiddlewareRegistration, Next, RequestContext, RequestError,
        RequestLifecycle, ServerOptions, ServerPlatform, Transformer,
        ValueProvider,
    },
    ControllerCatalog, DependencyCache, FactoryDefinition, Identifier,
    InjectError, ModuleRef, ParameterSpec, Platform, Provider, Registry, Scope,
    Svc, TypeDefinition,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

struct GreetingService;

impl GreetingService {
    fn greet(&self, name: &str) -> String {
        format!("Hello, {}!", name)
    }
}

struct GreetingController {
    service: Svc<GreetingService>,
}

struct GreetingModule;

fn greeting_controller() -> ControllerMetadata {
    ControllerMetadata::new(
        "/greet",
        TypeDefinition::new(|args| {
            Ok(GreetingController {
                service: args.required()?,
            })
        })
        .parameter(ParameterSpec::of::<GreetingService>()),
    )
    .action(
        ActionMetadata::new(
            "greet",
            HttpMethod::Get,
            "/",
            |controller: Svc<GreetingController>,
             args: ActionArguments,
             _: RequestContext| async move {
                let name = args.text(0).unwrap_or("stranger").to_owned();
                Ok(ActionResult::text(controller.service.greet(&name)))
            },
        )
        .parameter(ValueProvider::query("name")),
    )
    .action(ActionMetadata::new(
        "private",
        HttpMethod::Get,
        "/private",
        |_: Svc<GreetingController>, _: ActionArguments, _: RequestContext| async move {
            Ok(ActionResult::redirect("/login"))
        },
    ))
    .action(ActionMetadata::new(
        "missing",
        HttpMethod::Get,
        "/missing",
        |_: Svc<GreetingController>, _: ActionArguments, _: RequestContext| async move {
            Err(RequestError::from(HttpException::not_found("Not Found")))
        },
    ))
    .action(ActionMetadata::new(
        "broken",
        HttpMethod::Get,
        "/broken",
        |_: Svc<GreetingController>, _: ActionArguments, _: RequestContext| async move {
            Err(RequestError::application("boom"))
        },
    ))
}

fn greeting_registry() -> Registry {
    let registry = Registry::new();
    registry.controllers().register(greeting_controller());
    registry.modules().register(
        TypeDefinition::new(|_| Ok(GreetingModule)),
        define_module! {
            providers = [
                Provider::constructor(
                    TypeDefinition::new(|_| Ok(GreetingService))
                        .scope(Scope::Singleton),
                ),
            ],
            controllers = [Identifier::of::<GreetingController>()],
        },
    );
    registry
}

fn serve(registry: Registry, options: ServerOptions) -> (Arc<MemoryPlatform>, Platform) {
    let memory = MemoryPlatform::new();
    let adapter: Arc<dyn ServerPlatform> = memory.clone();
    let platform = Platform::new(adapter, registry, options).unwrap();
    (memory, platform)
}

#[tokio::test]
async fn greeting_is_served() {
    let (memory, platform) = serve(greeting_registry(), ServerOptions::default());
    platform.bootstrap(Identifier::of::<GreetingModule>()).unwrap();

    let response = memory.dispatch("GET", "/greet?name=Ada").await;
    assert_eq!(200, response.status);
    assert_eq!(Some("Hello, Ada!"), response.body.as_deref());

    let response = memory.dispatch("GET", "/greet").await;
    assert_eq!(Some("Hello, stranger!"), response.body.as_deref());
}

#[tokio::test]
async fn redirects_set_status_and_location_only() {
    let (memory, platform) = serve(greeting_registry(), ServerOptions::default());
    platform.bootstrap(Identifier::of::<GreetingModule>()).unwrap();

    let response = memory.dispatch("GET", "/greet/private").await;
    assert_eq!(302, response.status);
    assert_eq!(Some("/login"), response.header("Location"));
    assert_eq!(None, response.body);
}

#[tokio::test]
async fn http_exceptions_become_json_responses() {
    let (memory, platform) = serve(greeting_registry(), ServerOptions::default());
    platform.bootstrap(Identifier::of::<GreetingModule>()).unwrap();

    let response = memory.dispatch("GET", "/greet/missing").await;
    assert_eq!(404, response.status);
    assert_eq!(Some("application/json"), response.header("Content-Type"));
    assert_eq!(
        Some(r#"{"errorCode":404,"description":"Not Found","message":"Not Found"}"#),
        response.body.as_deref()
    );
}

#[tokio::test]
async fn other_errors_become_internal_server_errors() {
    let (memory, platform) = serve(greeting_registry(), ServerOptions::default());
    platform.bootstrap(Identifier::of::<GreetingModule>()).unwrap();

    let response = memory.dispatch("GET", "/greet/broken").await;
    assert_eq!(500, response.status);
    assert_eq!(Some("Internal Server Error"), response.body.as_deref());

    let options = ServerOptions {
        expose_error_details: true,
        ..ServerOptions::default()
    };
    let (memory, platform) = serve(greeting_registry(), options);
    platform.bootstrap(Identifier::of::<GreetingModule>()).unwrap();

    let response = memory.dispatch("GET", "/greet/broken").await;
    assert_eq!(Some("Internal Server Error: boom"), response.body.as_deref());
}

#[tokio::test]
async fn routes_are_prefixed() {
    let options = ServerOptions::from_json(r#"{ "routePrefix": "/api" }"#).unwrap();
    let (memory, platform) = serve(greeting_registry(), options);
    platform.bootstrap(Identifier::of::<GreetingModule>()).unwrap();

    assert!(memory.routes().contains(&String::from("GET /api/greet")));
    let response = memory.dispatch("GET", "/api/greet?name=Bo").await;
    assert_eq!(Some("Hello, Bo!"), response.body.as_deref());
    assert_eq!(404, memory.dispatch("GET", "/greet").await.status);
}

#[test]
fn platform_must_be_bootstrapped() {
    let (_, platform) = serve(greeting_registry(), ServerOptions::default());
    assert!(matches!(platform.module(), Err(InjectError::NotBootstrapped)));
    assert!(matches!(
        platform.resolve::<GreetingService>(Identifier::of::<GreetingService>()),
        Err(InjectError::NotBootstrapped)
    ));

    platform.bootstrap(Identifier::of::<GreetingModule>()).unwrap();
    let first = platform
        .resolve::<GreetingService>(Identifier::of::<GreetingService>())
        .unwrap();
    let second = platform
        .resolve::<GreetingService>(Identifier::of::<GreetingService>())
        .unwrap();
    assert!(Svc::ptr_eq(&first, &second));
}

#[derive(Default)]
struct Log(Mutex<Vec<String>>);

impl Log {
    fn push(&self, entry: impl Into<String>) {
        self.0.lock().push(entry.into());
    }

    fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }
}

struct Recorder {
    name: &'static str,
    log: Arc<Log>,
}

#[async_trait]
impl Filter for Recorder {
    async fn filter(
        &self,
        invocation: &ActionInvocation,
        next: Next<'_, HandlerResult<ActionResult>>,
    ) -> HandlerResult<ActionResult> {
        self.log
            .push(format!("{} before {}", self.name, invocation.action().name()));
        let result = next.run().await;
        self.log.push(format!("{} after", self.name));
        result
    }
}

struct Gate;

#[async_trait]
impl Filter for Gate {
    async fn filter(
        &self,
        invocation: &ActionInvocation,
        next: Next<'_, HandlerResult<ActionResult>>,
    ) -> HandlerResult<ActionResult> {
        if invocation.context().header("authorization").is_null() {
            return Ok(ActionResult::status(401));
        }
        next.run().await
    }
}

struct CounterController {
    hits: Svc<AtomicUsize>,
}

struct CounterModule;

fn counter_registry(log: &Arc<Log>) -> Registry {
    let registry = Registry::new();
    registry.controllers().register(
        ControllerMetadata::new(
            "/counter",
            TypeDefinition::new(|args| {
                Ok(CounterController {
                    hits: args.required()?,
                })
            })
            .parameter("hits"),
        )
        .filter(FilterRegistration::instance(
            Recorder {
                name: "controller",
                log: log.clone(),
            },
            10,
        ))
        .action(
            ActionMetadata::new(
                "hit",
                HttpMethod::Post,
                "/:by",
                |controller: Svc<CounterController>,
                 args: ActionArguments,
                 _: RequestContext| async move {
                    let by: usize = args.json(0)?;
                    let total = controller.hits.fetch_add(by, Ordering::SeqCst) + by;
                    ActionResult::json(json!({ "total": total }))
                },
            )
            .parameter(ValueProvider::custom("route parameter by", |context| {
                let by = context.param("by");
                let parsed = by.as_str().and_then(|by| by.parse::<u64>().ok());
                Ok(parsed.map_or(by, |parsed| ContextValue::Json(parsed.into())))
            }))
            .filter(FilterRegistration::instance(
                Recorder {
                    name: "action",
                    log: log.clone(),
                },
                20,
            )),
        )
        .action(
            ActionMetadata::new(
                "secure",
                HttpMethod::Get,
                "/secure",
                |_: Svc<CounterController>, _: ActionArguments, _: RequestContext| async move {
                    let content = ContentResult {
                        status: 201,
                        content: ContextValue::text("created"),
                        content_type: None,
                    };
                    Ok(ActionResult::from(content.with_content_type("text/plain")))
                },
            )
            .filter(FilterRegistration::instance(Gate, 0)),
        ),
    );
    registry.modules().register(
        TypeDefinition::new(|_| Ok(CounterModule)),
        define_module! {
            providers = [
                Provider::value("hits", AtomicUsize::new(0)).scoped(Scope::Singleton),
            ],
            controllers = [Identifier::of::<CounterController>()],
        },
    );
    registry
}

#[tokio::test]
async fn filters_wrap_actions_in_priority_order() {
    let log = Arc::new(Log::default());
    let (memory, platform) = serve(counter_registry(&log), ServerOptions::default());
    platform.bootstrap(Identifier::of::<CounterModule>()).unwrap();
    platform.server().register_filter(FilterRegistration::instance(
        Recorder {
            name: "global",
            log: log.clone(),
        },
        30,
    ));

    let response = memory.dispatch("POST", "/counter/2").await;
    assert_eq!(Some(r#"{"total":2}"#), response.body.as_deref());
    assert_eq!(Some("application/json"), response.header("Content-Type"));
    let response = memory.dispatch("POST", "/counter/3").await;
    assert_eq!(Some(r#"{"total":5}"#), response.body.as_deref());

    assert_eq!(
        vec![
            "controller before hit",
            "action before hit",
            "global before hit",
            "global after",
            "action after",
            "controller after",
        ],
        log.entries()[..6].to_vec()
    );
}

#[tokio::test]
async fn filters_may_short_circuit() {
    let log = Arc::new(Log::default());
    let (memory, platform) = serve(counter_registry(&log), ServerOptions::default());
    platform.bootstrap(Identifier::of::<CounterModule>()).unwrap();

    let response = memory.dispatch("GET", "/counter/secure").await;
    assert_eq!(401, response.status);
    assert_eq!(None, response.body);

    let response = memory
        .send(MemoryRequest::new("GET", "/counter/secure").header("Authorization", "yes"))
        .await;
    assert_eq!(201, response.status);
    assert_eq!(Some("text/plain"), response.header("Content-Type"));
    assert_eq!(Some("created"), response.body.as_deref());
}

#[tokio::test]
async fn invalid_json_parameters_are_bad_requests() {
    let log = Arc::new(Log::default());
    let (memory, platform) = serve(counter_registry(&log), ServerOptions::default());
    platform.bootstrap(Identifier::of::<CounterModule>()).unwrap();

    let response = memory.dispatch("POST", "/counter/many").await;
    assert_eq!(400, response.status);
    assert_eq!(Some("application/json"), response.header("Content-Type"));
}

struct Blocker {
    log: Arc<Log>,
}

#[async_trait]
impl Middleware for Blocker {
    async fn handle(
        &self,
        context: &RequestContext,
        next: Next<'_, HandlerResult<()>>,
    ) -> HandlerResult<()> {
        self.log.push("blocker");
        if !context.header("x-block").is_null() {
            context.set_status(403)?;
            return Ok(());
        }
        next.run().await
    }
}

struct Tagger {
    log: Arc<Log>,
}

#[async_trait]
impl Middleware for Tagger {
    async fn handle(
        &self,
        context: &RequestContext,
        next: Next<'_, HandlerResult<()>>,
    ) -> HandlerResult<()> {
        self.log.push("tagger");
        context.set_header("X-Tagged", "yes")?;
        next.run().await
    }
}

#[tokio::test]
async fn middleware_runs_in_order_and_may_stop_requests() {
    let log = Arc::new(Log::default());
    let (memory, platform) = serve(greeting_registry(), ServerOptions::default());
    platform.bootstrap(Identifier::of::<GreetingModule>()).unwrap();
    platform
        .server()
        .register_middleware(MiddlewareRegistration::instance(Tagger { log: log.clone() }));
    platform
        .server()
        .register_middleware(MiddlewareRegistration::instance(Blocker { log: log.clone() }));

    let response = memory.dispatch("GET", "/greet?name=Ada").await;
    assert_eq!(Some("yes"), response.header("X-Tagged"));
    assert_eq!(Some("Hello, Ada!"), response.body.as_deref());
    assert_eq!(vec!["tagger", "blocker"], log.entries());

    let response = memory
        .send(MemoryRequest::new("GET", "/greet?name=Ada").header("X-Block", "1"))
        .await;
    assert_eq!(403, response.status);
    assert_eq!(None, response.body);
}

struct AuditModule;

struct Audit {
    log: Svc<Log>,
    user: String,
}

#[async_trait]
impl RequestLifecycle for Audit {
    async fn on_request_start(&self, _context: &RequestContext) -> HandlerResult<()> {
        self.log.push(format!("start {}", self.user));
        Ok(())
    }

    async fn on_request_end(&self, _context: &RequestContext) -> HandlerResult<()> {
        self.log.push(format!("end {}", self.user));
        Ok(())
    }
}

struct AuditController {
    audit: Svc<Audit>,
}

fn audit_registry() -> Registry {
    let registry = Registry::new();
    registry.controllers().register(
        ControllerMetadata::new(
            "/audit",
            TypeDefinition::new(|args| {
                Ok(AuditController {
                    audit: args.required()?,
                })
            })
            .parameter(ParameterSpec::of::<Audit>()),
        )
        .transformer(Transformer::trim(10))
        .action(
            ActionMetadata::new(
                "note",
                HttpMethod::Put,
                "/",
                |controller: Svc<AuditController>,
                 args: ActionArguments,
                 _: RequestContext| async move {
                    let note = args.text(0).unwrap_or_default().to_owned();
                    controller
                        .audit
                        .log
                        .push(format!("note {} by {}", note, controller.audit.user));
                    Ok(ActionResult::status(204))
                },
            )
            .parameter(ValueProvider::body_field("note"))
            .transformer(Transformer::required(0)),
        ),
    );
    registry.modules().register(
        TypeDefinition::new(|_| Ok(AuditModule)),
        define_module! {
            providers = [
                Provider::value(Identifier::of::<Log>(), Log::default()),
                Provider::constructor(
                    TypeDefinition::new(|args| {
                        let log = args.required()?;
                        let context = args.required::<RequestContext>()?;
                        let user = context
                            .header("x-user")
                            .as_str()
                            .unwrap_or("anonymous")
                            .to_owned();
                        Ok(Audit { log, user })
                    })
                    .parameter(ParameterSpec::of::<Log>())
                    .parameter(ParameterSpec::of::<RequestContext>())
                    .scope(Scope::Request)
                    .with_lifecycle::<Audit>(),
                ),
            ],
            controllers = [Identifier::of::<AuditController>()],
        },
    );
    registry
}

#[tokio::test]
async fn request_services_see_the_request_and_get_lifecycle_hooks() {
    let (memory, platform) = serve(audit_registry(), ServerOptions::default());
    platform.bootstrap(Identifier::of::<AuditModule>()).unwrap();

    let response = memory
        .send(
            MemoryRequest::new("PUT", "/audit")
                .header("X-User", "ada")
                .body(json!({ "note": "  hello  " })),
        )
        .await;
    assert_eq!(204, response.status);

    let response = memory
        .send(MemoryRequest::new("PUT", "/audit").body(json!({})))
        .await;
    assert_eq!(400, response.status);

    let log = platform.resolve::<Log>(Identifier::of::<Log>()).unwrap();
    assert_eq!(
        vec![
            "start ada",
            "note hello by ada",
            "end ada",
            "start anonymous",
        ],
        log.entries()
    );
}

struct Fallback {
    handled: Arc<AtomicUsize>,
}

#[async_trait]
impl ErrorHandler for Fallback {
    async fn handle(&self, error: &RequestError, context: &RequestContext) -> bool {
        if error.as_http().is_some() {
            return false;
        }
        self.handled.fetch_add(1, Ordering::SeqCst);
        context.set_status(503).is_ok()
    }
}

#[tokio::test]
async fn error_handlers_are_offered_errors_first() {
    let handled = Arc::new(AtomicUsize::new(0));
    let (memory, platform) = serve(greeting_registry(), ServerOptions::default());
    platform.bootstrap(Identifier::of::<GreetingModule>()).unwrap();
    platform.server().set_error_handler(Fallback {
        handled: handled.clone(),
    });

    let response = memory.dispatch("GET", "/greet/broken").await;
    assert_eq!(503, response.status);
    assert_eq!(None, response.body);

    let response = memory.dispatch("GET", "/greet/missing").await;
    assert_eq!(404, response.status);
    assert_eq!(1, handled.load(Ordering::SeqCst));
}

struct VisitController;

struct VisitModule;

#[tokio::test]
async fn controllers_are_constructed_per_request() {
    let constructed = Arc::new(AtomicUsize::new(0));
    let counter = constructed.clone();

    let registry = Registry::new();
    registry.controllers().register(
        ControllerMetadata::new(
            "/visit",
            TypeDefinition::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(VisitController)
            }),
        )
        .action(ActionMetadata::new(
            "visit",
            HttpMethod::All,
            "/",
            |_: Svc<VisitController>, _: ActionArguments, context: RequestContext| async move {
                Ok(ActionResult::text(context.url().unwrap_or_default()))
            },
        )),
    );
    registry.modules().register(
        TypeDefinition::new(|_| Ok(VisitModule)),
        define_module! {
            controllers = [Identifier::of::<VisitController>()],
        },
    );

    let (memory, platform) = serve(registry, ServerOptions::default());
    platform.bootstrap(Identifier::of::<VisitModule>()).unwrap();

    let response = memory.dispatch("DELETE", "/visit?x=1").await;
    assert_eq!(Some("/visit?x=1"), response.body.as_deref());
    memory.dispatch("GET", "/visit").await;
    assert_eq!(2, constructed.load(Ordering::SeqCst));
}

struct Session {
    user: String,
}

struct SessionController {
    session: Svc<Session>,
}

struct SessionModule;

fn session_registry() -> Registry {
    let registry = Registry::new();
    registry.controllers().register(
        ControllerMetadata::new(
            "/session",
            TypeDefinition::new(|args| {
                Ok(SessionController {
                    session: args.required()?,
                })
            })
            .parameter(ParameterSpec::of::<Session>()),
        )
        .action(ActionMetadata::new(
            "whoami",
            HttpMethod::Get,
            "/",
            |controller: Svc<SessionController>, _: ActionArguments, _: RequestContext| async move {
                Ok(ActionResult::text(controller.session.user.clone()))
            },
        )),
    );
    registry.modules().register(
        TypeDefinition::new(|_| Ok(SessionModule)),
        define_module! {
            providers = [
                Provider::factory(
                    Identifier::of::<Session>(),
                    FactoryDefinition::new_async(
                        [ParameterSpec::of::<RequestContext>()],
                        |mut args| async move {
                            let context = args.required::<RequestContext>()?;
                            tokio::task::yield_now().await;
                            let user = context
                                .header("x-user")
                                .as_str()
                                .unwrap_or("anonymous")
                                .to_owned();
                            Ok::<_, InjectError>(Session { user })
                        },
                    )
                    .scope(Scope::Request),
                ),
            ],
            controllers = [Identifier::of::<SessionController>()],
        },
    );
    registry
}

#[tokio::test]
async fn controllers_may_depend_on_async_factories() {
    let (memory, platform) = serve(session_registry(), ServerOptions::default());
    platform.bootstrap(Identifier::of::<SessionModule>()).unwrap();

    let request = MemoryRequest::new("GET", "/session").header("x-user", "ada");
    let response = memory.send(request).await;
    assert_eq!(200, response.status);
    assert_eq!(Some("ada"), response.body.as_deref());

    let response = memory.dispatch("GET", "/session").await;
    assert_eq!(Some("anonymous"), response.body.as_deref());
}

struct Pool {
    size: usize,
}

struct PoolModule {
    pool: Svc<Pool>,
}

fn pool_registry() -> Registry {
    let registry = Registry::new();
    registry.modules().register(
        TypeDefinition::new(|args| Ok(PoolModule { pool: args.required()? }))
            .parameter(ParameterSpec::of::<Pool>()),
        define_module! {
            providers = [
                Provider::factory(
                    Identifier::of::<Pool>(),
                    FactoryDefinition::new_async(Vec::<ParameterSpec>::new(), |_| async {
                        tokio::task::yield_now().await;
                        Ok::<_, InjectError>(Pool { size: 4 })
                    })
                    .scope(Scope::Singleton),
                ),
            ],
        },
    );
    registry
}

#[tokio::test]
async fn module_classes_may_await_their_dependencies() {
    let (_memory, platform) = serve(pool_registry(), ServerOptions::default());

    let error = platform
        .bootstrap(Identifier::of::<PoolModule>())
        .unwrap_err();
    assert!(matches!(
        error,
        InjectError::AsyncRequired { identifier } if identifier == Identifier::of::<PoolModule>()
    ));
    assert!(matches!(platform.module(), Err(InjectError::NotBootstrapped)));

    let root = platform
        .bootstrap_async(Identifier::of::<PoolModule>())
        .await
        .unwrap();
    let module = root.instance_as::<PoolModule>().unwrap();
    assert_eq!(4, module.pool.size);

    let pool = platform
        .resolve_async::<Pool>(Identifier::of::<Pool>())
        .await
        .unwrap();
    assert!(Svc::ptr_eq(&module.pool, &pool));
}

struct ReportController;

struct ReportModule;

#[tokio::test]
async fn failed_route_registration_registers_nothing() {
    let registry = Registry::new();
    registry.controllers().register(greeting_controller());
    registry.controllers().register(
        ControllerMetadata::new("/report", TypeDefinition::new(|_| Ok(ReportController)))
            .action(ActionMetadata::new(
                "report",
                HttpMethod::Get,
                "/",
                |_: Svc<ReportController>, _: ActionArguments, _: RequestContext| async move {
                    Ok(ActionResult::text("report"))
                },
            )),
    );
    registry.modules().register(
        TypeDefinition::new(|_| Ok(ReportModule)),
        define_module! {
            providers = [Provider::constructor(TypeDefinition::new(|_| Ok(GreetingService)))],
            controllers = [
                Identifier::of::<GreetingController>(),
                Identifier::of::<ReportController>(),
            ],
        },
    );
    let (memory, platform) = serve(registry.clone(), ServerOptions::default());

    let cache = DependencyCache::new();
    cache.begin_scope(Scope::Singleton);
    let root = ModuleRef::create(
        &registry,
        &Identifier::of::<ReportModule>(),
        platform.platform_container(),
        &cache,
    )
    .unwrap();
    let partial = ControllerCatalog::new();
    partial.register(greeting_controller());
    let error = platform
        .server()
        .register_routes(&root, &partial)
        .unwrap_err();
    assert!(matches!(error, InjectError::NotAController { .. }));
    assert!(memory.routes().is_empty());

    platform.bootstrap(Identifier::of::<ReportModule>()).unwrap();
    assert_eq!(5, memory.routes().len());
    let response = memory.dispatch("GET", "/report").await;
    assert_eq!(Some("report"), response.body.as_deref());
}
