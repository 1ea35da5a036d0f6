use rust_decimal::Decimal;
use sea_orm::ActiveValue::NotSet;
use sea_orm::{ActiveModelTrait, Set};
use std::str::FromStr;
use uuid::Uuid;

use patisserie_api::{
    db::{create_orm_conn, create_pool, run_migrations},
    dto::{
        orders::{CreateOrderRequest, OrderItemRequest, UpdateOrderStatusRequest},
        products::{AdjustStockRequest, UpdateProductRequest},
    },
    entity::orders::OrderStatus,
    entity::products::{ActiveModel as ProductActive, Model as ProductModel, ProductCategory},
    error::{AppError, ItemIssueReason},
    middleware::auth::{AuthUser, MaybeUser},
    routes::params::{OrderListQuery, Pagination},
    services::{order_service, product_service},
    state::AppState,
};

fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

// Allow skipping when no DB is configured in the environment.
async fn setup_state() -> anyhow::Result<Option<AppState>> {
    let database_url =
        match std::env::var("TEST_DATABASE_URL").or_else(|_| std::env::var("DATABASE_URL")) {
            Ok(url) => url,
            Err(_) => {
                eprintln!(
                    "Skipping test: set TEST_DATABASE_URL or DATABASE_URL to run integration flow tests."
                );
                return Ok(None);
            }
        };

    let pool = create_pool(&database_url).await?;
    let orm = create_orm_conn(&database_url).await?;
    run_migrations(&orm).await?;

    Ok(Some(AppState { pool, orm }))
}

fn admin() -> AuthUser {
    AuthUser {
        user_id: Uuid::new_v4(),
        role: "admin".into(),
    }
}

fn customer() -> AuthUser {
    AuthUser {
        user_id: Uuid::new_v4(),
        role: "user".into(),
    }
}

// Products get a unique name per call so tests do not collide on the
// slug unique index when sharing one database.
async fn seed_product(
    state: &AppState,
    price: &str,
    stock: i32,
    available: bool,
) -> anyhow::Result<ProductModel> {
    let id = Uuid::new_v4();
    let name = format!("Test Eclair {id}");
    let product = ProductActive {
        id: Set(id),
        name: Set(name.clone()),
        slug: Set(product_service::slugify(&name)),
        description: Set(Some("A pastry for testing".into())),
        price: Set(dec(price)),
        stock: Set(stock),
        available: Set(available),
        category: Set(ProductCategory::Patisseries),
        created_at: NotSet,
        updated_at: NotSet,
    }
    .insert(&state.orm)
    .await?;
    Ok(product)
}

fn one_line(product_id: Uuid, quantity: i32) -> CreateOrderRequest {
    CreateOrderRequest {
        customer_name: "Marie Dupont".into(),
        customer_email: Some("marie@example.com".into()),
        customer_phone: None,
        notes: None,
        items: vec![OrderItemRequest {
            product_id,
            quantity,
        }],
    }
}

async fn stock_of(state: &AppState, id: Uuid) -> anyhow::Result<i32> {
    let resp = product_service::get_product(state, id).await?;
    Ok(resp.data.unwrap().stock)
}

// The concrete scenario from the requirements: stock 10 at 4.50, order of 3,
// confirm, then cancel restores everything.
#[tokio::test]
async fn create_confirm_cancel_flow() -> anyhow::Result<()> {
    let Some(state) = setup_state().await? else {
        return Ok(());
    };
    let product = seed_product(&state, "4.50", 10, true).await?;
    let user = customer();
    let auth_admin = admin();

    let created = order_service::create_order(
        &state,
        &MaybeUser(Some(user.clone())),
        one_line(product.id, 3),
    )
    .await?
    .data
    .unwrap();
    assert_eq!(created.order.status, OrderStatus::Pending);
    assert_eq!(created.order.total, dec("13.50"));
    assert_eq!(created.items.len(), 1);
    assert_eq!(created.items[0].unit_price, dec("4.50"));
    assert_eq!(created.items[0].line_total, dec("13.50"));
    assert_eq!(stock_of(&state, product.id).await?, 7);

    // Confirmation moves the state machine but does not touch stock.
    let confirmed = order_service::confirm_order(&state, &auth_admin, created.order.id)
        .await?
        .data
        .unwrap();
    assert_eq!(confirmed.order.status, OrderStatus::Paid);
    assert_eq!(stock_of(&state, product.id).await?, 7);

    // Revenue counts paid orders.
    let stats = order_service::statistics(&state, &auth_admin)
        .await?
        .data
        .unwrap();
    assert!(stats.total_revenue >= dec("13.50"));
    assert!(stats.paid_orders >= 1);

    // Cancellation releases every reserved unit.
    let cancelled = order_service::cancel_order(&state, &user, created.order.id)
        .await?
        .data
        .unwrap();
    assert_eq!(cancelled.order.status, OrderStatus::Cancelled);
    assert_eq!(stock_of(&state, product.id).await?, 10);

    // A second cancel is rejected and must not release stock again.
    let err = order_service::cancel_order(&state, &user, created.order.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::AlreadyCancelled));
    assert_eq!(stock_of(&state, product.id).await?, 10);

    Ok(())
}

#[tokio::test]
async fn creation_is_all_or_nothing() -> anyhow::Result<()> {
    let Some(state) = setup_state().await? else {
        return Ok(());
    };
    let a = seed_product(&state, "3.00", 10, true).await?;
    let b = seed_product(&state, "5.00", 5, true).await?;

    let request = CreateOrderRequest {
        customer_name: "Jean Martin".into(),
        customer_email: None,
        customer_phone: None,
        notes: None,
        items: vec![
            OrderItemRequest {
                product_id: a.id,
                quantity: 3,
            },
            OrderItemRequest {
                product_id: b.id,
                quantity: 9999,
            },
        ],
    };

    let err = order_service::create_order(&state, &MaybeUser(None), request)
        .await
        .unwrap_err();
    match err {
        AppError::InsufficientStock(issues) => {
            assert_eq!(issues.len(), 1);
            assert_eq!(issues[0].product_id, b.id);
            assert!(matches!(
                issues[0].reason,
                ItemIssueReason::InsufficientStock {
                    requested: 9999,
                    available: 5
                }
            ));
        }
        other => panic!("expected InsufficientStock, got {other:?}"),
    }

    // No partial reservation: A is completely untouched.
    assert_eq!(stock_of(&state, a.id).await?, 10);
    assert_eq!(stock_of(&state, b.id).await?, 5);

    Ok(())
}

#[tokio::test]
async fn validation_reports_every_bad_item_at_once() -> anyhow::Result<()> {
    let Some(state) = setup_state().await? else {
        return Ok(());
    };
    let unavailable = seed_product(&state, "2.00", 10, false).await?;
    let short = seed_product(&state, "2.00", 2, true).await?;
    let unknown_id = Uuid::new_v4();

    let request = CreateOrderRequest {
        customer_name: "Jean Martin".into(),
        customer_email: None,
        customer_phone: None,
        notes: None,
        items: vec![
            OrderItemRequest {
                product_id: unknown_id,
                quantity: 1,
            },
            OrderItemRequest {
                product_id: unavailable.id,
                quantity: 1,
            },
            OrderItemRequest {
                product_id: short.id,
                quantity: 3,
            },
        ],
    };

    let err = order_service::create_order(&state, &MaybeUser(None), request)
        .await
        .unwrap_err();
    match err {
        AppError::Validation(issues) => {
            assert_eq!(issues.len(), 3);
            assert!(issues.iter().any(|i| i.product_id == unknown_id
                && matches!(i.reason, ItemIssueReason::UnknownProduct)));
            assert!(issues.iter().any(|i| i.product_id == unavailable.id
                && matches!(i.reason, ItemIssueReason::ProductUnavailable)));
            assert!(issues.iter().any(|i| i.product_id == short.id
                && matches!(i.reason, ItemIssueReason::InsufficientStock { .. })));
        }
        other => panic!("expected Validation, got {other:?}"),
    }
    assert_eq!(stock_of(&state, short.id).await?, 2);

    Ok(())
}

#[tokio::test]
async fn unit_price_is_a_snapshot() -> anyhow::Result<()> {
    let Some(state) = setup_state().await? else {
        return Ok(());
    };
    let product = seed_product(&state, "4.50", 10, true).await?;
    let auth_admin = admin();
    let user = customer();

    let created = order_service::create_order(
        &state,
        &MaybeUser(Some(user.clone())),
        one_line(product.id, 2),
    )
    .await?
    .data
    .unwrap();
    assert_eq!(created.order.total, dec("9.00"));

    // Raise the catalog price after the fact.
    product_service::update_product(
        &state,
        &auth_admin,
        product.id,
        UpdateProductRequest {
            name: None,
            description: None,
            price: Some(dec("99.99")),
            category: None,
            available: None,
        },
    )
    .await?;

    let fetched = order_service::get_order(&state, &user, created.order.id)
        .await?
        .data
        .unwrap();
    assert_eq!(fetched.order.total, dec("9.00"));
    assert_eq!(fetched.items[0].unit_price, dec("4.50"));

    Ok(())
}

// Two orders of 6 against a stock of 10: exactly one wins, stock ends at 4.
#[tokio::test]
async fn concurrent_creation_never_oversells() -> anyhow::Result<()> {
    let Some(state) = setup_state().await? else {
        return Ok(());
    };
    let product = seed_product(&state, "1.00", 10, true).await?;

    let s1 = state.clone();
    let s2 = state.clone();
    let id = product.id;
    let t1 = tokio::spawn(async move {
        order_service::create_order(&s1, &MaybeUser(None), one_line(id, 6)).await
    });
    let t2 = tokio::spawn(async move {
        order_service::create_order(&s2, &MaybeUser(None), one_line(id, 6)).await
    });

    let results = [t1.await?, t2.await?];
    let ok_count = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(ok_count, 1, "exactly one of the two orders must win");
    let losing = results.into_iter().find(|r| r.is_err()).unwrap();
    assert!(matches!(
        losing.unwrap_err(),
        AppError::InsufficientStock(_)
    ));

    assert_eq!(stock_of(&state, product.id).await?, 4);

    Ok(())
}

#[tokio::test]
async fn state_machine_rejects_forbidden_transitions() -> anyhow::Result<()> {
    let Some(state) = setup_state().await? else {
        return Ok(());
    };
    let product = seed_product(&state, "2.00", 10, true).await?;
    let auth_admin = admin();

    let created = order_service::create_order(&state, &MaybeUser(None), one_line(product.id, 1))
        .await?
        .data
        .unwrap();
    let order_id = created.order.id;

    // pending → delivered skips stages and must be rejected.
    let err = order_service::advance_status(
        &state,
        &auth_admin,
        order_id,
        UpdateOrderStatusRequest {
            status: OrderStatus::Delivered,
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::InvalidTransition { .. }));

    // Walk the happy path to delivered.
    order_service::confirm_order(&state, &auth_admin, order_id).await?;
    for status in [OrderStatus::Ready, OrderStatus::Delivered] {
        order_service::advance_status(
            &state,
            &auth_admin,
            order_id,
            UpdateOrderStatusRequest { status },
        )
        .await?;
    }

    // Delivered is terminal: no cancellation, no stock back.
    let err = order_service::cancel_order(&state, &auth_admin, order_id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::AlreadyDelivered));
    assert_eq!(stock_of(&state, product.id).await?, 9);

    Ok(())
}

#[tokio::test]
async fn anonymous_orders_are_allowed() -> anyhow::Result<()> {
    let Some(state) = setup_state().await? else {
        return Ok(());
    };
    let product = seed_product(&state, "3.10", 4, true).await?;

    let created = order_service::create_order(&state, &MaybeUser(None), one_line(product.id, 2))
        .await?
        .data
        .unwrap();
    assert_eq!(created.order.user_id, None);
    assert_eq!(created.order.total, dec("6.20"));

    Ok(())
}

// The customer filter matches regardless of the case the caller types.
#[tokio::test]
async fn customer_filter_is_case_insensitive() -> anyhow::Result<()> {
    let Some(state) = setup_state().await? else {
        return Ok(());
    };
    let product = seed_product(&state, "2.50", 10, true).await?;
    let user = customer();

    let mut request = one_line(product.id, 1);
    request.customer_name = format!("Marie Dupont {}", user.user_id);

    let created = order_service::create_order(&state, &MaybeUser(Some(user.clone())), request)
        .await?
        .data
        .unwrap();

    let listed = order_service::list_orders(
        &state,
        &user,
        OrderListQuery {
            pagination: Pagination {
                page: None,
                per_page: None,
            },
            status: None,
            customer: Some(format!("marie dupont {}", user.user_id)),
            sort_order: None,
        },
    )
    .await?
    .data
    .unwrap();

    assert!(listed.items.iter().any(|o| o.id == created.order.id));

    Ok(())
}

#[tokio::test]
async fn stock_adjustment_goes_through_the_ledger() -> anyhow::Result<()> {
    let Some(state) = setup_state().await? else {
        return Ok(());
    };
    let product = seed_product(&state, "2.00", 10, true).await?;
    let auth_admin = admin();

    // Relative decrement below zero is refused.
    let err = product_service::adjust_stock(
        &state,
        &auth_admin,
        product.id,
        AdjustStockRequest {
            delta: Some(-15),
            stock: None,
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::InsufficientStock(_)));
    assert_eq!(stock_of(&state, product.id).await?, 10);

    // Valid delta.
    let adjusted = product_service::adjust_stock(
        &state,
        &auth_admin,
        product.id,
        AdjustStockRequest {
            delta: Some(-4),
            stock: None,
        },
    )
    .await?
    .data
    .unwrap();
    assert_eq!(adjusted.stock, 6);

    // Absolute override.
    let adjusted = product_service::adjust_stock(
        &state,
        &auth_admin,
        product.id,
        AdjustStockRequest {
            delta: None,
            stock: Some(42),
        },
    )
    .await?
    .data
    .unwrap();
    assert_eq!(adjusted.stock, 42);

    // Both or neither is a bad request.
    let err = product_service::adjust_stock(
        &state,
        &auth_admin,
        product.id,
        AdjustStockRequest {
            delta: None,
            stock: None,
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));

    // A delta whose negation does not fit in i32 is refused, not wrapped.
    let err = product_service::adjust_stock(
        &state,
        &auth_admin,
        product.id,
        AdjustStockRequest {
            delta: Some(i32::MIN),
            stock: None,
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));
    assert_eq!(stock_of(&state, product.id).await?, 42);

    Ok(())
}
