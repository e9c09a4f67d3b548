//! Integration tests for common Trellis workflows.
//!
//! An order controller delegates to a transactional order service, which in
//! turn calls a transactional audit service. Everything runs against the
//! in-memory driver so the connection journal can be inspected.

use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use trellis::prelude::*;
use trellis::{LoggingInterceptor, MemoryDatabase, Proxy};

// =============================================================================
// Components
// =============================================================================

#[derive(Debug, Deserialize, PartialEq)]
struct Order {
    id: i64,
    amount: i64,
}

struct AuditService {
    db: Arc<Database>,
}

impl Component for AuditService {
    fn create(container: &Container) -> Result<Self, Error> {
        Ok(Self {
            db: container.get::<Database>()?,
        })
    }
}

impl AuditService {
    const RECORD: Action<Self, ()> = Action::new("record", Self::record).transactional();

    fn record<'a>(&'a self, cx: &'a CallContext, param: &'a Param) -> BoxFuture<'a, Result<(), Error>> {
        Box::pin(async move {
            let mut fields = FieldMap::new();
            fields.insert("event".into(), json!("order placed"));
            fields.insert("amount".into(), json!(param.get_long("amount")?));
            self.db.insert(cx.scope(), "audit", &fields).await?;
            Ok(())
        })
    }
}

struct OrderService {
    db: Arc<Database>,
    audit: Proxy<AuditService>,
    saw_transaction: AtomicBool,
}

impl Component for OrderService {
    fn create(container: &Container) -> Result<Self, Error> {
        Ok(Self {
            db: container.get::<Database>()?,
            audit: container.proxy::<AuditService>()?,
            saw_transaction: AtomicBool::new(false),
        })
    }
}

impl OrderService {
    const PLACE: Action<Self, Order> = Action::new("place", Self::place).transactional();
    const PLACE_AUDITED: Action<Self, Order> = Action::new("place_audited", Self::place_audited).transactional();

    fn place<'a>(&'a self, cx: &'a CallContext, param: &'a Param) -> BoxFuture<'a, Result<Order, Error>> {
        Box::pin(async move {
            self.saw_transaction.store(cx.in_transaction(), Ordering::SeqCst);
            let amount = param
                .get_long("amount")?
                .ok_or_else(|| Error::BadRequest("amount is required".into()))?;

            let mut fields = FieldMap::new();
            fields.insert("amount".into(), json!(amount));
            self.db.insert(cx.scope(), "orders", &fields).await?;

            let orders: Vec<Order> = self.db.query_list(cx.scope(), "SELECT * FROM orders", &[]).await?;
            orders
                .into_iter()
                .last()
                .ok_or_else(|| Error::Internal("inserted order not found".into()))
        })
    }

    fn place_audited<'a>(&'a self, cx: &'a CallContext, param: &'a Param) -> BoxFuture<'a, Result<Order, Error>> {
        Box::pin(async move {
            let order = self.place(cx, param).await?;
            self.audit.call(&AuditService::RECORD, cx, param).await?;
            Ok(order)
        })
    }
}

struct OrderController {
    orders: Proxy<OrderService>,
    db: Arc<Database>,
}

impl Component for OrderController {
    fn create(container: &Container) -> Result<Self, Error> {
        Ok(Self {
            orders: container.proxy::<OrderService>()?,
            db: container.get::<Database>()?,
        })
    }
}

impl OrderController {
    const CREATE: Action<Self> = Action::new("create", Self::create_order).transactional();
    const CREATE_AUDITED: Action<Self> = Action::new("create_audited", Self::create_audited);
    const SHOW: Action<Self> = Action::new("show", Self::show);

    fn create_order<'a>(
        &'a self,
        cx: &'a CallContext,
        param: &'a Param,
    ) -> BoxFuture<'a, Result<ActionResult, Error>> {
        Box::pin(async move {
            let order = self.orders.call(&OrderService::PLACE, cx, param).await?;
            Ok(Data::new(json!({ "id": order.id, "amount": order.amount }))?.into())
        })
    }

    fn create_audited<'a>(
        &'a self,
        cx: &'a CallContext,
        param: &'a Param,
    ) -> BoxFuture<'a, Result<ActionResult, Error>> {
        Box::pin(async move {
            let order = self.orders.call(&OrderService::PLACE_AUDITED, cx, param).await?;
            Ok(View::new(format!("/orders/{}", order.id)).into())
        })
    }

    fn show<'a>(&'a self, cx: &'a CallContext, param: &'a Param) -> BoxFuture<'a, Result<ActionResult, Error>> {
        Box::pin(async move {
            let id = param.get_long("id")?.unwrap_or_default();
            let order: Option<Order> = self
                .db
                .query_one(cx.scope(), "SELECT * FROM orders WHERE id = ?", &[json!(id)])
                .await?;
            let view = View::new("order.html").with("found", order.is_some())?;
            Ok(view.into())
        })
    }
}

impl Controller for OrderController {
    fn base_path() -> &'static str {
        "/orders"
    }

    fn routes(routes: &mut RouteRegistrar<'_, Self>) {
        routes
            .post("/", Self::CREATE)
            .post("/audited", Self::CREATE_AUDITED)
            .get("/show", Self::SHOW);
    }
}

fn application(memory: &MemoryDatabase) -> Application {
    Application::builder()
        .database(Database::from_source(memory.clone()))
        .interceptor(LoggingInterceptor)
        .component::<AuditService>()
        .component::<OrderService>()
        .controller::<OrderController>()
        .build()
        .unwrap()
}

fn memory() -> MemoryDatabase {
    MemoryDatabase::new().with_table("orders").with_table("audit")
}

fn create_request(amount: &str) -> Request {
    Request::new("POST", "/orders").with_form(&[("amount", amount)]).unwrap()
}

// =============================================================================
// Transactional Workflows
// =============================================================================

#[tokio::test]
async fn test_transactional_create_commits_once() {
    let memory = memory();
    let app = application(&memory);

    let outcome = app.dispatch(create_request("42")).await.unwrap();

    let body: serde_json::Value = serde_json::from_slice(outcome.json_body().unwrap()).unwrap();
    assert_eq!(body, json!({ "id": 1, "amount": 42 }));

    let inserts: Vec<_> = memory
        .executed()
        .into_iter()
        .filter(|sql| sql.starts_with("INSERT"))
        .collect();
    assert_eq!(inserts, vec!["INSERT INTO orders (amount) VALUES (?)"]);
    assert_eq!(memory.begins(), 1);
    assert_eq!(memory.commits(), 1);
    assert_eq!(memory.rollbacks(), 0);
    assert_eq!(memory.rows("orders").len(), 1);
    assert_eq!(memory.acquired(), memory.released());
}

#[tokio::test]
async fn test_failed_statement_rolls_back() {
    let memory = memory();
    memory.fail_when("insert into orders");
    let app = application(&memory);

    let err = app.dispatch(create_request("42")).await.unwrap_err();

    assert!(matches!(err, Error::Data(trellis::data::DataError::Access { .. })));
    assert_eq!(err.status_code(), 500);
    assert_eq!(memory.rollbacks(), 1);
    assert_eq!(memory.commits(), 0);
    assert!(memory.rows("orders").is_empty());
}

#[tokio::test]
async fn test_action_error_rolls_back_with_original_error() {
    let memory = memory();
    let app = application(&memory);

    let err = app.dispatch(Request::new("POST", "/orders")).await.unwrap_err();

    assert!(matches!(err, Error::BadRequest(_)));
    assert_eq!(memory.begins(), 1);
    assert_eq!(memory.rollbacks(), 1);
}

#[tokio::test]
async fn test_nested_transactional_calls_share_one_transaction() {
    let memory = memory();
    let app = application(&memory);

    let outcome = app
        .dispatch(Request::new("POST", "/orders/audited").with_form(&[("amount", "7")]).unwrap())
        .await
        .unwrap();

    assert_eq!(
        outcome,
        Outcome::Redirect {
            location: "/orders/1".to_string()
        }
    );
    assert_eq!(memory.begins(), 1);
    assert_eq!(memory.commits(), 1);
    assert_eq!(memory.acquired(), 1);
    assert_eq!(memory.rows("orders").len(), 1);
    assert_eq!(memory.rows("audit").len(), 1);
}

#[tokio::test]
async fn test_nested_failure_rolls_back_outer_work() {
    let memory = memory();
    memory.fail_when("INSERT INTO audit");
    let app = application(&memory);

    let err = app
        .dispatch(Request::new("POST", "/orders/audited").with_form(&[("amount", "7")]).unwrap())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Data(_)));
    assert_eq!(memory.begins(), 1);
    assert_eq!(memory.rollbacks(), 1);
    assert!(memory.rows("orders").is_empty());
    assert!(memory.rows("audit").is_empty());
}

#[tokio::test]
async fn test_transaction_flag_scoped_to_call() {
    let memory = memory();
    let app = application(&memory);
    let service = app.container().proxy::<OrderService>().unwrap();
    let cx = CallContext::new();

    assert!(!cx.in_transaction());
    let order = service
        .call(&OrderService::PLACE, &cx, &Param::from_pairs([("amount", "5")]))
        .await
        .unwrap();
    assert!(!cx.in_transaction());

    assert_eq!(order, Order { id: 1, amount: 5 });
    assert!(service.target().saw_transaction.load(Ordering::SeqCst));
    assert!(!cx.scope().is_associated().await);
}

#[tokio::test]
async fn test_direct_target_call_skips_transaction() {
    let memory = memory();
    let app = application(&memory);
    let service = app.container().proxy::<OrderService>().unwrap();
    let cx = CallContext::new();

    service
        .target()
        .place(&cx, &Param::from_pairs([("amount", "5")]))
        .await
        .unwrap();

    assert_eq!(memory.begins(), 0);
    assert!(!service.target().saw_transaction.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_independent_requests_use_separate_connections() {
    let memory = memory();
    let app = application(&memory);

    app.dispatch(create_request("1")).await.unwrap();
    app.dispatch(create_request("2")).await.unwrap();

    let connections: Vec<usize> = memory
        .journal()
        .iter()
        .filter(|e| matches!(e, trellis::data::JournalEntry::Begin { .. }))
        .map(|e| e.connection())
        .collect();
    assert_eq!(connections, vec![1, 2]);
    assert_eq!(memory.rows("orders").len(), 2);
}

// =============================================================================
// Reads and Dispatch
// =============================================================================

#[tokio::test]
async fn test_non_transactional_read() {
    let memory = memory();
    let app = application(&memory);
    app.dispatch(create_request("3")).await.unwrap();

    let outcome = app.dispatch(Request::new("GET", "/orders/show?id=1")).await.unwrap();
    match outcome {
        Outcome::Forward { template, model } => {
            assert_eq!(template, "/WEB-INF/view/order.html");
            assert_eq!(model["found"], json!(true));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }

    // The read ran outside any transaction and its connection was returned.
    assert_eq!(memory.begins(), 1);
    assert_eq!(memory.acquired(), memory.released());
}

#[tokio::test]
async fn test_unknown_route() {
    let app = application(&memory());

    let err = app.dispatch(Request::new("GET", "/unknown")).await.unwrap_err();
    assert!(matches!(err, Error::RouteNotFound(_)));
    assert_eq!(err.status_code(), 404);
}

#[tokio::test]
async fn test_connect_database_from_config() {
    let app = Application::builder()
        .connect_database()
        .await
        .unwrap()
        .component::<AuditService>()
        .component::<OrderService>()
        .controller::<OrderController>()
        .build()
        .unwrap();

    let db = app.container().get::<Database>().unwrap();
    let cx = CallContext::new();
    db.execute_script(cx.scope(), "CREATE TABLE orders (id INTEGER, amount INTEGER);")
        .await
        .unwrap();
    drop(cx);

    let outcome = app.dispatch(create_request("9")).await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(outcome.json_body().unwrap()).unwrap();
    assert_eq!(body["amount"], json!(9));
}

#[tokio::test]
async fn test_unsupported_driver_fails_to_connect() {
    let mut config = FrameworkConfig::default();
    config.database.driver = "oracle".to_string();

    let result = Application::builder().config(config).connect_database().await;
    assert!(matches!(result, Err(Error::Data(_))));
}
