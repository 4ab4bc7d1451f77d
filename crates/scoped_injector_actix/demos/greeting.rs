//! Spawns a web server that listens on localhost. A code must be sent in the
//! query string to be greeted. Try <http://localhost:8080/hello/Ada>, then
//! <http://localhost:8080/hello/Ada?code=my_secret_password>.
//!
//! Set `RUST_LOG=debug` to see routes being registered and requests being
//! handled.

use actix_web::{App, HttpServer};
use async_trait::async_trait;
use scoped_injector_actix::{
    define_module,
    server::{
        ActionArguments, ActionMetadata, ActionResult, ControllerMetadata,
        HandlerResult, HttpException, HttpMethod, Middleware,
        MiddlewareRegistration, Next, RequestContext, ServerController,
        ServerOptions, ValueProvider,
    },
    ActixPlatform, Identifier, ParameterSpec, Platform, Provider, Registry,
    Scope, Svc, TypeDefinition,
};
use std::io;
use tracing_subscriber::EnvFilter;

struct QueryAuthenticator;

#[async_trait]
impl Middleware for QueryAuthenticator {
    async fn handle(
        &self,
        context: &RequestContext,
        next: Next<'_, HandlerResult<()>>,
    ) -> HandlerResult<()> {
        if context.query("code").as_str() == Some("my_secret_password") {
            next.run().await
        } else {
            context.set_status(403)?;
            context.set_body("Incorrect password")
        }
    }
}

struct Greeter {
    greeting: Svc<String>,
}

struct GreetingController {
    greeter: Svc<Greeter>,
}

/// Registers the authenticator when the module is composed.
struct AppModule;

fn build_registry() -> Registry {
    let registry = Registry::new();
    registry.controllers().register(
        ControllerMetadata::new(
            "/hello",
            TypeDefinition::new(|args| {
                Ok(GreetingController {
                    greeter: args.required()?,
                })
            })
            .parameter(ParameterSpec::of::<Greeter>()),
        )
        .action(
            ActionMetadata::new(
                "hello",
                HttpMethod::Get,
                "/:name",
                |controller: Svc<GreetingController>,
                 args: ActionArguments,
                 _: RequestContext| async move {
                    let name = args
                        .text(0)
                        .ok_or_else(|| HttpException::bad_request("Missing name"))?;
                    Ok(ActionResult::text(format!(
                        "{}, {}!",
                        controller.greeter.greeting, name
                    )))
                },
            )
            .parameter(ValueProvider::route_param("name")),
        ),
    );
    registry.modules().register(
        TypeDefinition::new(|args| {
            let server: Svc<ServerController> = args.required()?;
            server.register_middleware(MiddlewareRegistration::instance(
                QueryAuthenticator,
            ));
            Ok(AppModule)
        })
        .parameter(ParameterSpec::of::<ServerController>()),
        define_module! {
            providers = [
                Provider::value("greeting", String::from("Hello")),
                Provider::constructor(
                    TypeDefinition::new(|args| Ok(Greeter { greeting: args.required()? }))
                        .parameter("greeting")
                        .scope(Scope::Singleton),
                ),
            ],
            controllers = [Identifier::of::<GreetingController>()],
        },
    );
    registry
}

#[actix_web::main]
async fn main() -> io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let actix = ActixPlatform::new();
    let platform = Platform::new(actix.clone(), build_registry(), ServerOptions::default())
        .map_err(|error| io::Error::new(io::ErrorKind::Other, error.to_string()))?;
    platform
        .bootstrap(Identifier::of::<AppModule>())
        .map_err(|error| io::Error::new(io::ErrorKind::Other, error.to_string()))?;

    HttpServer::new(move || App::new().default_service(actix.service()))
        .bind(("127.0.0.1", 8080))?
        .run()
        .await
}
