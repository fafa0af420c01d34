use std::sync::Arc;

use courier_core::ConfigError;
use courier_framework::{Destination, LoggingMiddleware, RouteTable, Router};

fn dest(address: &str) -> Destination {
    Destination::new(address).handler(|| async {})
}

#[test]
fn resolve_returns_bindings_in_registration_order() {
    let mut table = RouteTable::new();
    table.register("orders.created", dest("billing")).unwrap();
    table.register("orders.created", dest("shipping")).unwrap();
    table.register("orders.cancelled", dest("billing")).unwrap();
    table.freeze();

    let addresses: Vec<_> = table
        .resolve("orders.created")
        .iter()
        .map(|b| b.address.as_str())
        .collect();
    assert_eq!(addresses, ["billing", "shipping"]);
    assert!(table.resolve("orders.deleted").is_empty());
    assert_eq!(table.len(), 3);

    let binding = table
        .resolve_for_delivery("billing", "orders.cancelled")
        .unwrap();
    assert_eq!(binding.event_id.as_str(), "orders.cancelled");
    assert!(table.resolve_for_delivery("shipping", "orders.cancelled").is_none());
}

#[test]
fn register_after_freeze_fails_and_leaves_table_unchanged() {
    let mut table = RouteTable::new();
    table.register("orders.created", dest("billing")).unwrap();
    table.freeze();

    assert_eq!(
        table.register("orders.created", dest("shipping")),
        Err(ConfigError::Frozen)
    );
    assert_eq!(
        table.register_middleware("log", LoggingMiddleware::new()),
        Err(ConfigError::Frozen)
    );
    assert_eq!(table.resolve("orders.created").len(), 1);
    assert!(table.is_ready());
}

#[test]
fn duplicate_binding_is_rejected() {
    let mut table = RouteTable::new();
    table.register("orders.created", dest("billing")).unwrap();
    assert!(matches!(
        table.register("orders.created", dest("billing")),
        Err(ConfigError::DuplicateBinding { .. })
    ));
}

#[test]
fn named_middlewares_resolve_at_registration() {
    let mut table = RouteTable::new();
    table
        .register_middleware("log", LoggingMiddleware::new())
        .unwrap();
    assert_eq!(
        table.register_middleware("log", LoggingMiddleware::new()),
        Err(ConfigError::DuplicateMiddleware("log".into()))
    );

    table
        .register(
            "orders.created",
            Destination::new("billing").named("log").handler(|| async {}),
        )
        .unwrap();
    let binding = Arc::clone(&table.resolve("orders.created")[0]);
    assert_eq!(binding.chain.middlewares().len(), 1);
    assert_eq!(binding.chain.middlewares()[0].name(), "logging");
}

#[test]
fn include_is_all_or_nothing() {
    let mut table = RouteTable::new().with_scope("orders");
    table.register("orders.created", dest("billing")).unwrap();

    let clashing = Router::new()
        .prefix("orders")
        .route("shipped", dest("billing"))
        .route("created", dest("billing"));
    assert!(matches!(
        table.include(clashing),
        Err(ConfigError::DuplicateBinding { .. })
    ));
    assert!(table.resolve("orders.shipped").is_empty());

    let fresh = Router::new()
        .prefix("orders")
        .route("shipped", dest("billing"))
        .route("returned", dest("returns"));
    table.include(fresh).unwrap();
    assert_eq!(table.len(), 3);

    let outside = Router::new().prefix("billing").route("paid", dest("billing"));
    assert!(matches!(
        table.include(outside),
        Err(ConfigError::OutOfScope { .. })
    ));
}
