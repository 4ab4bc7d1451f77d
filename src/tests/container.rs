use crate::{
    Container, DependencyResolver, FactoryDefinition, Identifier, InjectError,
    Lazy, ParameterSpec, Scope, Svc, TypeDefinition, ValueDefinition,
};
use parking_lot::Mutex;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

struct D;

struct B {
    d: Svc<D>,
}

struct C {
    d: Svc<D>,
}

struct A {
    b: Svc<B>,
    c: Svc<C>,
}

fn diamond() -> Container {
    let container = Container::new("root");
    container
        .register_type(TypeDefinition::new(|_| Ok(D)))
        .unwrap();
    container
        .register_type(
            TypeDefinition::new(|args| Ok(B { d: args.required()? }))
                .parameter(ParameterSpec::of::<D>()),
        )
        .unwrap();
    container
        .register_type(
            TypeDefinition::new(|args| Ok(C { d: args.required()? }))
                .parameter(ParameterSpec::of::<D>()),
        )
        .unwrap();
    container
        .register_type(
            TypeDefinition::new(|args| {
                Ok(A {
                    b: args.required()?,
                    c: args.required()?,
                })
            })
            .parameter(ParameterSpec::of::<B>())
            .parameter(ParameterSpec::of::<C>()),
        )
        .unwrap();
    container
}

#[test]
fn diamond_shares_one_instance_per_resolution() {
    let resolver = DependencyResolver::new(diamond());

    let first = resolver.get::<A>().unwrap();
    assert!(Svc::ptr_eq(&first.b.d, &first.c.d));

    let second = resolver.get::<A>().unwrap();
    assert!(!Svc::ptr_eq(&first.b.d, &second.b.d));
}

struct Piston;

struct Engine {
    _piston: Svc<Piston>,
}

struct Car {
    _engine: Svc<Engine>,
}

#[test]
fn missing_dependency_names_the_full_chain() {
    let container = Container::new("garage");
    container
        .register_type(
            TypeDefinition::new(|args| Ok(Car { _engine: args.required()? }))
                .parameter(ParameterSpec::of::<Engine>()),
        )
        .unwrap();
    container
        .register_type(
            TypeDefinition::new(|args| Ok(Engine { _piston: args.required()? }))
                .parameter(ParameterSpec::of::<Piston>()),
        )
        .unwrap();

    let error = container
        .dependency_graph(&Identifier::of::<Car>())
        .unwrap_err();
    match &error {
        InjectError::MissingDependency { path } => assert_eq!(
            &vec![
                Identifier::of::<Car>(),
                Identifier::of::<Engine>(),
                Identifier::of::<Piston>(),
            ],
            path
        ),
        error => panic!("unexpected error: {}", error),
    }
    assert_eq!(
        "Error composing Car < Engine < Piston. Piston is not registered",
        error.to_string()
    );
}

#[test]
fn unregistered_root_is_not_registered() {
    let container = Container::new("empty");
    let error = container
        .dependency_graph(&Identifier::of::<Car>())
        .unwrap_err();
    assert!(matches!(error, InjectError::NotRegistered { identifier } if identifier == Identifier::of::<Car>()));
}

struct Radio;

struct Dashboard {
    radio: Option<Svc<Radio>>,
}

#[test]
fn optional_dependencies_resolve_to_none() {
    let container = Container::new("root");
    container
        .register_type(
            TypeDefinition::new(|args| {
                Ok(Dashboard {
                    radio: args.optional()?,
                })
            })
            .parameter(ParameterSpec::of::<Radio>().optional()),
        )
        .unwrap();

    let resolver = DependencyResolver::new(container.clone());
    let dashboard = resolver.get::<Dashboard>().unwrap();
    assert!(dashboard.radio.is_none());
    assert!(resolver.resolve_optional::<Radio>(Identifier::of::<Radio>()).unwrap().is_none());

    container
        .register_type(TypeDefinition::new(|_| Ok(Radio)))
        .unwrap();
    let dashboard = resolver.get::<Dashboard>().unwrap();
    assert!(dashboard.radio.is_some());
}

struct First {
    second: Lazy<Second>,
}

struct Second {
    third: Lazy<Third>,
}

struct Third {
    first: Lazy<First>,
}

fn cycle(deferred: bool, scope: Option<Scope>) -> Container {
    let spec = |spec: ParameterSpec| if deferred { spec.deferred() } else { spec };
    let scoped = |definition: TypeDefinition| match &scope {
        Some(scope) => definition.scope(scope.clone()),
        None => definition,
    };
    let container = Container::new("cycle");
    container
        .register_type(scoped(
            TypeDefinition::new(|args| Ok(First { second: args.deferred()? }))
                .parameter(spec(ParameterSpec::of::<Second>())),
        ))
        .unwrap();
    container
        .register_type(scoped(
            TypeDefinition::new(|args| Ok(Second { third: args.deferred()? }))
                .parameter(spec(ParameterSpec::of::<Third>())),
        ))
        .unwrap();
    container
        .register_type(scoped(
            TypeDefinition::new(|args| Ok(Third { first: args.deferred()? }))
                .parameter(spec(ParameterSpec::of::<First>())),
        ))
        .unwrap();
    container
}

#[test]
fn eager_cycles_are_rejected() {
    let container = cycle(false, Some(Scope::Singleton));
    let error = container
        .dependency_graph(&Identifier::of::<First>())
        .unwrap_err();

    match &error {
        InjectError::CircularDependency { cycle } => assert_eq!(
            &vec![
                Identifier::of::<First>(),
                Identifier::of::<Second>(),
                Identifier::of::<Third>(),
                Identifier::of::<First>(),
            ],
            cycle
        ),
        error => panic!("unexpected error: {}", error),
    }
    assert_eq!(
        "Circular dependency detected: First > Second > Third > First",
        error.to_string()
    );
}

#[test]
fn deferred_cycles_resolve_to_their_counterparts() {
    let resolver = DependencyResolver::new(cycle(true, Some(Scope::Singleton)));

    let first = resolver.get::<First>().unwrap();
    assert!(!first.second.is_resolved());

    let second = first.second.value().unwrap();
    let third = second.third.value().unwrap();
    let back = third.first.value().unwrap();
    assert!(Svc::ptr_eq(&first, &back));
    assert!(first.second.is_resolved());
    assert!(Svc::ptr_eq(&second, &resolver.get::<Second>().unwrap()));
}

#[test]
fn deferred_handles_reach_the_instances_of_their_resolution() {
    let resolver = DependencyResolver::new(cycle(true, None));

    let first = resolver.get::<First>().unwrap();
    let second = first.second.value().unwrap();
    let third = second.third.value().unwrap();
    let back = third.first.value().unwrap();
    assert!(Svc::ptr_eq(&first, &back));
    assert!(Svc::ptr_eq(&second, &first.second.value().unwrap()));

    let other = resolver.get::<First>().unwrap();
    assert!(!Svc::ptr_eq(&first, &other));
}

struct Parent {
    child: Lazy<Child>,
}

struct Child {
    parent: Svc<Parent>,
}

#[test]
fn deferred_targets_see_their_dependent() {
    let container = Container::new("root");
    container
        .register_type(
            TypeDefinition::new(|args| Ok(Parent { child: args.deferred()? }))
                .parameter(ParameterSpec::of::<Child>().deferred()),
        )
        .unwrap();
    container
        .register_type(
            TypeDefinition::new(|args| Ok(Child { parent: args.required()? }))
                .parameter(ParameterSpec::of::<Parent>()),
        )
        .unwrap();

    let resolver = DependencyResolver::new(container);
    let parent = resolver.get::<Parent>().unwrap();
    let child = parent.child.value().unwrap();
    assert!(Svc::ptr_eq(&child.parent, &parent));
}

struct Greeting(&'static str);

#[test]
fn duplicate_registrations_fail_but_children_shadow() {
    let parent = Container::new("parent");
    parent
        .register_type(TypeDefinition::new(|_| Ok(Greeting("parent"))))
        .unwrap();
    let error = parent
        .register_type(TypeDefinition::new(|_| Ok(Greeting("again"))))
        .unwrap_err();
    assert!(matches!(error, InjectError::AlreadyRegistered { ref container, .. } if container == "parent"));

    let child = parent.create_child("child");
    child
        .register_type(TypeDefinition::new(|_| Ok(Greeting("child"))))
        .unwrap();

    let from_child = DependencyResolver::new(child).get::<Greeting>().unwrap();
    let from_parent = DependencyResolver::new(parent).get::<Greeting>().unwrap();
    assert_eq!("child", from_child.0);
    assert_eq!("parent", from_parent.0);
}

struct Clock;

struct Session {
    clock: Svc<Clock>,
}

struct Page {
    first: Svc<Session>,
    second: Svc<Session>,
}

#[test]
fn singletons_outlive_injection_scopes() {
    let container = Container::new("root");
    container
        .register_type(TypeDefinition::new(|_| Ok(Clock)).scope(Scope::Singleton))
        .unwrap();
    container
        .register_type(
            TypeDefinition::new(|args| Ok(Session { clock: args.required()? }))
                .parameter(ParameterSpec::of::<Clock>())
                .scope(Scope::Injection),
        )
        .unwrap();
    container
        .register_type(
            TypeDefinition::new(|args| {
                Ok(Page {
                    first: args.required()?,
                    second: args.required()?,
                })
            })
            .parameter(ParameterSpec::of::<Session>())
            .parameter(ParameterSpec::of::<Session>())
            .scope(Scope::Transient),
        )
        .unwrap();

    let resolver = DependencyResolver::new(container);
    let one = resolver.get::<Page>().unwrap();
    let two = resolver.get::<Page>().unwrap();

    assert!(Svc::ptr_eq(&one.first, &one.second));
    assert!(!Svc::ptr_eq(&one.first, &two.first));
    assert!(Svc::ptr_eq(&one.first.clock, &two.first.clock));
}

#[test]
fn transient_values_are_constructed_every_time() {
    let constructed = Arc::new(AtomicUsize::new(0));
    let counter = constructed.clone();
    let container = Container::new("root");
    container
        .register(
            "counter",
            FactoryDefinition::from_fn(move || {
                Ok(counter.fetch_add(1, Ordering::SeqCst))
            })
            .scope(Scope::Transient),
        )
        .unwrap();

    let resolver = DependencyResolver::new(container);
    assert_eq!(0, *resolver.resolve::<usize>("counter").unwrap());
    assert_eq!(1, *resolver.resolve::<usize>("counter").unwrap());
    assert_eq!(2, constructed.load(Ordering::SeqCst));
}

#[test]
fn singletons_are_constructed_once_across_threads() {
    let constructed = Arc::new(AtomicUsize::new(0));
    let counter = constructed.clone();
    let container = Container::new("root");
    container
        .register_type(
            TypeDefinition::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                std::thread::sleep(std::time::Duration::from_millis(10));
                Ok(Clock)
            })
            .scope(Scope::Singleton),
        )
        .unwrap();

    let resolver = DependencyResolver::new(container);
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let resolver = resolver.clone();
            std::thread::spawn(move || resolver.get::<Clock>().unwrap())
        })
        .collect();
    let clocks: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(1, constructed.load(Ordering::SeqCst));
    assert!(clocks.windows(2).all(|w| Svc::ptr_eq(&w[0], &w[1])));
}

struct Config(&'static str);

struct Mailer {
    config: Svc<Config>,
}

struct Unrelated;

#[test]
fn registration_invalidates_only_dependents() {
    let parent = Container::new("parent");
    parent
        .register_type(TypeDefinition::new(|_| Ok(Config("parent"))))
        .unwrap();

    let child = parent.create_child("child");
    child
        .register_type(
            TypeDefinition::new(|args| Ok(Mailer { config: args.required()? }))
                .parameter(ParameterSpec::of::<Config>()),
        )
        .unwrap();
    child
        .register_type(TypeDefinition::new(|_| Ok(Unrelated)))
        .unwrap();

    let service = Identifier::of::<Mailer>();
    let unrelated = Identifier::of::<Unrelated>();
    child.dependency_graph(&service).unwrap();
    let before = child.dependency_graph(&unrelated).unwrap();
    assert!(child.compiled_node(&service).is_some());

    child
        .register_type(TypeDefinition::new(|_| Ok(Config("child"))))
        .unwrap();

    assert!(child.compiled_node(&service).is_none());
    let after = child.compiled_node(&unrelated).unwrap();
    assert!(Arc::ptr_eq(&before, &after));

    let resolved = DependencyResolver::new(child).get::<Mailer>().unwrap();
    assert_eq!("child", resolved.config.0);
}

#[test]
fn aliases_and_imports_redirect_lookups() {
    let source = Container::new("source");
    source
        .register("greeting", ValueDefinition::new("hello"))
        .unwrap();

    let target = Container::new("target");
    target.import("greeting", &source).unwrap();
    target.register_alias("greeting", "salutation").unwrap();

    let resolver = DependencyResolver::new(target.clone());
    assert_eq!("hello", *resolver.resolve::<&str>("salutation").unwrap());

    target.register_alias("loop.b", "loop.a").unwrap();
    target.register_alias("loop.a", "loop.b").unwrap();
    assert!(matches!(
        target.dependency_graph(&Identifier::token("loop.a")),
        Err(InjectError::CircularDependency { .. })
    ));
}

#[test]
fn parameter_overrides_replace_dependencies() {
    let container = Container::new("root");
    container
        .register("greeting", ValueDefinition::new("hello"))
        .unwrap();
    container
        .register("farewell", ValueDefinition::new("goodbye"))
        .unwrap();
    container
        .register(
            "message",
            FactoryDefinition::new(
                vec![ParameterSpec::token("greeting")],
                |args| Ok(args.required::<&str>()?.to_uppercase()),
            ),
        )
        .unwrap();

    let resolver = DependencyResolver::new(container.clone());
    assert_eq!("HELLO", *resolver.resolve::<String>("message").unwrap());

    container.override_parameter("message", 0, "farewell");
    assert_eq!("GOODBYE", *resolver.resolve::<String>("message").unwrap());
}

struct Node {
    parent: Mutex<Option<Svc<Tree>>>,
}

struct Tree {
    root: Svc<Node>,
}

#[test]
fn properties_may_close_cycles() {
    let container = Container::new("root");
    container
        .register_type(
            TypeDefinition::new(|_| {
                Ok(Node {
                    parent: Mutex::new(None),
                })
            })
            .property("parent", ParameterSpec::of::<Tree>(), |node: &Node, args| {
                *node.parent.lock() = Some(args.required()?);
                Ok(())
            })
            .scope(Scope::Singleton),
        )
        .unwrap();
    container
        .register_type(
            TypeDefinition::new(|args| Ok(Tree { root: args.required()? }))
                .parameter(ParameterSpec::of::<Node>())
                .scope(Scope::Singleton),
        )
        .unwrap();

    let resolver = DependencyResolver::new(container);
    let tree = resolver.get::<Tree>().unwrap();
    let parent = tree.root.parent.lock().clone().unwrap();
    assert!(Svc::ptr_eq(&tree, &parent));
}

#[test]
fn deep_clones_are_isolated() {
    let parent = Container::new("parent");
    let child = parent.create_child("child");
    child
        .register("greeting", ValueDefinition::new("hello"))
        .unwrap();

    let cloned = child.deep_clone();
    assert_eq!(2, cloned.containers().len());
    assert_eq!(child.id(), cloned.root().id());
    assert!(cloned.find(parent.id()).is_some());

    cloned
        .root()
        .register("farewell", ValueDefinition::new("goodbye"))
        .unwrap();
    assert!(!child.is_registered(&Identifier::token("farewell")));
    assert!(cloned.root().is_registered(&Identifier::token("greeting")));
}

struct Ledger {
    auditor: Mutex<Option<Svc<Auditor>>>,
}

struct Auditor {
    _ledger: Svc<Ledger>,
}

struct Vault;

#[test]
fn failed_compilations_memoize_nothing() {
    let container = Container::new("root");
    container
        .register_type(
            TypeDefinition::new(|_| {
                Ok(Ledger {
                    auditor: Mutex::new(None),
                })
            })
            .property(
                "auditor",
                ParameterSpec::of::<Auditor>(),
                |ledger: &Ledger, args| {
                    *ledger.auditor.lock() = Some(args.required()?);
                    Ok(())
                },
            )
            .property("vault", ParameterSpec::of::<Vault>(), |_: &Ledger, _| Ok(())),
        )
        .unwrap();
    container
        .register_type(
            TypeDefinition::new(|args| Ok(Auditor { _ledger: args.required()? }))
                .parameter(ParameterSpec::of::<Ledger>()),
        )
        .unwrap();

    let error = container
        .dependency_graph(&Identifier::of::<Ledger>())
        .unwrap_err();
    assert_eq!(
        "Error composing Ledger < Vault. Vault is not registered",
        error.to_string()
    );
    assert!(container.compiled_node(&Identifier::of::<Auditor>()).is_none());

    let error = container
        .dependency_graph(&Identifier::of::<Auditor>())
        .unwrap_err();
    assert_eq!(
        "Error composing Auditor < Ledger < Vault. Vault is not registered",
        error.to_string()
    );
}

struct Connection {
    url: &'static str,
}

struct Repository {
    connection: Svc<Connection>,
}

fn async_container(constructed: Arc<AtomicUsize>) -> Container {
    let container = Container::new("root");
    container
        .register("db.url", ValueDefinition::new("postgres://localhost"))
        .unwrap();
    container
        .register(
            Identifier::of::<Connection>(),
            FactoryDefinition::new_async(["db.url"], move |mut args| {
                let constructed = constructed.clone();
                async move {
                    let url = args.required::<&str>()?;
                    tokio::task::yield_now().await;
                    constructed.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, InjectError>(Connection { url: *url })
                }
            })
            .scope(Scope::Singleton),
        )
        .unwrap();
    container
        .register_type(
            TypeDefinition::new(|args| {
                Ok(Repository {
                    connection: args.required()?,
                })
            })
            .parameter(ParameterSpec::of::<Connection>()),
        )
        .unwrap();
    container
}

#[tokio::test]
async fn async_factories_are_awaited() {
    let constructed = Arc::new(AtomicUsize::new(0));
    let resolver = DependencyResolver::new(async_container(constructed.clone()));

    let repository = resolver.get_async::<Repository>().await.unwrap();
    let again = resolver.get_async::<Repository>().await.unwrap();
    assert_eq!("postgres://localhost", repository.connection.url);
    assert!(!Svc::ptr_eq(&repository, &again));
    assert!(Svc::ptr_eq(&repository.connection, &again.connection));
    assert_eq!(1, constructed.load(Ordering::SeqCst));

    let cached = resolver.get::<Repository>().unwrap();
    assert!(Svc::ptr_eq(&repository.connection, &cached.connection));
}

#[test]
fn synchronous_resolution_rejects_async_factories() {
    let resolver = DependencyResolver::new(async_container(Arc::default()));

    match resolver.get::<Repository>() {
        Err(InjectError::AsyncRequired { identifier }) => {
            assert_eq!(Identifier::of::<Connection>(), identifier);
        }
        other => panic!("unexpected result: {:?}", other.map(|_| ())),
    }
}

struct Report {
    repository: Lazy<Repository>,
}

#[tokio::test]
async fn deferred_handles_can_be_awaited() {
    let container = async_container(Arc::default());
    container
        .register_type(
            TypeDefinition::new(|args| {
                Ok(Report {
                    repository: args.deferred()?,
                })
            })
            .parameter(ParameterSpec::of::<Repository>().deferred()),
        )
        .unwrap();

    let resolver = DependencyResolver::new(container);
    let report = resolver.get::<Report>().unwrap();
    assert!(report.repository.value().is_err());

    let repository = report.repository.value_async().await.unwrap();
    assert_eq!("postgres://localhost", repository.connection.url);
    assert!(report.repository.is_resolved());
}
