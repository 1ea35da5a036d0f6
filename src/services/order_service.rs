//! Order engine: creation, the status state machine, cancellation reversal
//! and the order-level queries. Every mutating operation runs inside one
//! transaction so the caller either sees the whole effect or none of it.

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::ActiveValue::NotSet;
use sea_orm::sea_query::extension::postgres::PgExpr;
use sea_orm::sea_query::{Expr, LockType};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use std::collections::HashMap;
use uuid::Uuid;

use crate::{
    audit::log_audit,
    dto::orders::{
        CreateOrderRequest, OrderList, OrderStatistics, OrderWithItems, UpdateOrderStatusRequest,
    },
    entity::{
        order_items::{
            ActiveModel as OrderItemActive, Column as OrderItemCol, Entity as OrderItems,
            Model as OrderItemModel,
        },
        orders::{
            ActiveModel as OrderActive, Column as OrderCol, Entity as Orders, Model as OrderModel,
            OrderStatus,
        },
        products::{Column as ProdCol, Entity as Products, Model as ProductModel},
    },
    error::{AppError, AppResult, ItemIssue, ItemIssueReason},
    middleware::auth::{AuthUser, MaybeUser, ensure_admin},
    models::{Order, OrderItem},
    response::{ApiResponse, Meta},
    routes::params::{OrderListQuery, SortOrder},
    services::stock_service,
    state::AppState,
};

/// Exact total over line items: sum of quantity * unit_price in fixed-point
/// decimal arithmetic. Recomputed from scratch, never patched incrementally.
pub fn order_total<I>(lines: I) -> Decimal
where
    I: IntoIterator<Item = (i32, Decimal)>,
{
    lines
        .into_iter()
        .map(|(quantity, unit_price)| unit_price * Decimal::from(quantity))
        .sum()
}

/// Collapse duplicate product lines into one, summing quantities and keeping
/// the first-seen position, so the stock check sees the combined demand.
fn merge_lines(items: &[crate::dto::orders::OrderItemRequest]) -> Vec<(Uuid, i32)> {
    let mut merged: Vec<(Uuid, i32)> = Vec::new();
    for item in items {
        match merged.iter_mut().find(|(id, _)| *id == item.product_id) {
            Some((_, quantity)) => *quantity = quantity.saturating_add(item.quantity),
            None => merged.push((item.product_id, item.quantity)),
        }
    }
    merged
}

pub async fn create_order(
    state: &AppState,
    user: &MaybeUser,
    payload: CreateOrderRequest,
) -> AppResult<ApiResponse<OrderWithItems>> {
    if payload.customer_name.trim().is_empty() {
        return Err(AppError::BadRequest("customer_name is required".into()));
    }
    if payload.items.is_empty() {
        return Err(AppError::BadRequest(
            "order must contain at least one item".into(),
        ));
    }

    // Catch non-positive quantities on the raw lines, before merging could
    // fold a bad line into a valid-looking combined one.
    let mut issues: Vec<ItemIssue> = Vec::new();
    for item in &payload.items {
        if item.quantity <= 0
            && !issues.iter().any(|i| i.product_id == item.product_id)
        {
            issues.push(ItemIssue {
                product_id: item.product_id,
                reason: ItemIssueReason::NonPositiveQuantity,
            });
        }
    }

    let lines = merge_lines(&payload.items);

    let txn = state.orm.begin().await?;

    // Lock the product rows in id order so two orders touching the same
    // products cannot deadlock each other.
    let mut ids: Vec<Uuid> = lines.iter().map(|(id, _)| *id).collect();
    ids.sort();
    let products: HashMap<Uuid, ProductModel> = Products::find()
        .filter(ProdCol::Id.is_in(ids))
        .order_by_asc(ProdCol::Id)
        .lock(LockType::Update)
        .all(&txn)
        .await?
        .into_iter()
        .map(|p| (p.id, p))
        .collect();

    // Validate the whole list before touching any stock, collecting every
    // problem so the caller sees them all at once.
    for (product_id, quantity) in &lines {
        if issues.iter().any(|i| i.product_id == *product_id) {
            continue;
        }
        match products.get(product_id) {
            None => issues.push(ItemIssue {
                product_id: *product_id,
                reason: ItemIssueReason::UnknownProduct,
            }),
            Some(product) if !product.available => issues.push(ItemIssue {
                product_id: *product_id,
                reason: ItemIssueReason::ProductUnavailable,
            }),
            Some(product) if product.stock < *quantity => issues.push(ItemIssue {
                product_id: *product_id,
                reason: ItemIssueReason::InsufficientStock {
                    requested: *quantity,
                    available: product.stock,
                },
            }),
            Some(_) => {}
        }
    }
    if !issues.is_empty() {
        let all_stock = issues
            .iter()
            .all(|i| matches!(i.reason, ItemIssueReason::InsufficientStock { .. }));
        // Dropping the transaction rolls it back; no stock was touched.
        return Err(if all_stock {
            AppError::InsufficientStock(issues)
        } else {
            AppError::Validation(issues)
        });
    }

    // Reserve every line. The rows are locked and validated, so a failure
    // here is unexpected and aborts the transaction as a whole.
    for (product_id, quantity) in &lines {
        stock_service::reserve(&txn, *product_id, *quantity).await?;
    }

    let total = order_total(lines.iter().map(|(id, qty)| (*qty, products[id].price)));

    let order = OrderActive {
        id: Set(Uuid::new_v4()),
        number: NotSet,
        user_id: Set(user.0.as_ref().map(|u| u.user_id)),
        customer_name: Set(payload.customer_name.trim().to_string()),
        customer_email: Set(payload.customer_email),
        customer_phone: Set(payload.customer_phone),
        status: Set(OrderStatus::Pending),
        notes: Set(payload.notes),
        total: Set(total),
        created_at: NotSet,
        updated_at: NotSet,
    }
    .insert(&txn)
    .await?;

    let mut items: Vec<OrderItem> = Vec::new();
    for (product_id, quantity) in &lines {
        let product = &products[product_id];
        let item = OrderItemActive {
            id: Set(Uuid::new_v4()),
            order_id: Set(order.id),
            product_id: Set(*product_id),
            quantity: Set(*quantity),
            // Snapshot of the catalog price; later price changes must not
            // affect this order.
            unit_price: Set(product.price),
            created_at: NotSet,
        }
        .insert(&txn)
        .await?;
        items.push(order_item_from_entity(item, product.name.clone()));
    }

    txn.commit().await?;

    if let Err(err) = log_audit(
        &state.pool,
        user.0.as_ref().map(|u| u.user_id),
        "order_create",
        Some("orders"),
        Some(serde_json::json!({ "order_id": order.id, "number": order.number })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Order created",
        OrderWithItems {
            order: order_from_entity(order),
            items,
        },
        Some(Meta::empty()),
    ))
}

pub async fn confirm_order(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<OrderWithItems>> {
    ensure_admin(user)?;
    let txn = state.orm.begin().await?;

    let order = find_locked(&txn, id).await?;
    if order.status != OrderStatus::Pending {
        return Err(AppError::InvalidTransition {
            from: order.status,
            to: OrderStatus::Paid,
        });
    }

    // Stock was already reserved at creation; confirmation only moves the
    // state machine forward.
    let mut active: OrderActive = order.into();
    active.status = Set(OrderStatus::Paid);
    active.updated_at = Set(Utc::now().into());
    let order = active.update(&txn).await?;

    let items = load_items(&txn, order.id).await?;
    txn.commit().await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "order_confirm",
        Some("orders"),
        Some(serde_json::json!({ "order_id": order.id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Order confirmed",
        OrderWithItems {
            order: order_from_entity(order),
            items,
        },
        Some(Meta::empty()),
    ))
}

pub async fn advance_status(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateOrderStatusRequest,
) -> AppResult<ApiResponse<OrderWithItems>> {
    ensure_admin(user)?;

    // Cancellation is not a plain status write: it must reverse stock.
    if payload.status == OrderStatus::Cancelled {
        return cancel_order(state, user, id).await;
    }

    let txn = state.orm.begin().await?;

    let order = find_locked(&txn, id).await?;
    if !order.status.can_transition_to(payload.status) {
        return Err(AppError::InvalidTransition {
            from: order.status,
            to: payload.status,
        });
    }

    let mut active: OrderActive = order.into();
    active.status = Set(payload.status);
    active.updated_at = Set(Utc::now().into());
    let order = active.update(&txn).await?;

    let items = load_items(&txn, order.id).await?;
    txn.commit().await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "order_status_update",
        Some("orders"),
        Some(serde_json::json!({ "order_id": order.id, "status": order.status })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Order updated",
        OrderWithItems {
            order: order_from_entity(order),
            items,
        },
        Some(Meta::empty()),
    ))
}

pub async fn cancel_order(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<OrderWithItems>> {
    let txn = state.orm.begin().await?;

    // The row lock makes the status check and the cancellation write one
    // atomic step: a concurrent cancel blocks here, then sees `cancelled`
    // and cannot release the stock a second time.
    let order = find_locked(&txn, id).await?;
    ensure_owner_or_admin(user, &order)?;

    match order.status {
        OrderStatus::Cancelled => return Err(AppError::AlreadyCancelled),
        OrderStatus::Delivered => return Err(AppError::AlreadyDelivered),
        _ => {}
    }

    let item_models = OrderItems::find()
        .filter(OrderItemCol::OrderId.eq(order.id))
        .all(&txn)
        .await?;
    for item in &item_models {
        stock_service::release(&txn, item.product_id, item.quantity).await?;
    }

    let mut active: OrderActive = order.into();
    active.status = Set(OrderStatus::Cancelled);
    active.updated_at = Set(Utc::now().into());
    let order = active.update(&txn).await?;

    let items = load_items(&txn, order.id).await?;
    txn.commit().await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "order_cancel",
        Some("orders"),
        Some(serde_json::json!({ "order_id": order.id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Order cancelled",
        OrderWithItems {
            order: order_from_entity(order),
            items,
        },
        Some(Meta::empty()),
    ))
}

pub async fn get_order(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<OrderWithItems>> {
    let order = Orders::find_by_id(id).one(&state.orm).await?;
    let order = match order {
        Some(o) => o,
        None => return Err(AppError::NotFound),
    };
    ensure_owner_or_admin(user, &order)?;

    let items = load_items(&state.orm, order.id).await?;

    Ok(ApiResponse::success(
        "OK",
        OrderWithItems {
            order: order_from_entity(order),
            items,
        },
        Some(Meta::empty()),
    ))
}

pub async fn list_orders(
    state: &AppState,
    user: &AuthUser,
    query: OrderListQuery,
) -> AppResult<ApiResponse<OrderList>> {
    let (page, limit, offset) = query.pagination.normalize();

    let mut condition = Condition::all();
    if user.role != "admin" {
        condition = condition.add(OrderCol::UserId.eq(user.user_id));
    }
    if let Some(status) = query.status {
        condition = condition.add(OrderCol::Status.eq(status));
    }
    if let Some(customer) = query.customer.as_ref().filter(|c| !c.is_empty()) {
        let pattern = format!("%{customer}%");
        condition = condition.add(
            Condition::any()
                .add(Expr::col(OrderCol::CustomerName).ilike(pattern.clone()))
                .add(Expr::col(OrderCol::CustomerEmail).ilike(pattern)),
        );
    }

    let sort_order = query.sort_order.unwrap_or(SortOrder::Desc);
    let mut finder = Orders::find().filter(condition);
    finder = match sort_order {
        SortOrder::Asc => finder.order_by_asc(OrderCol::CreatedAt),
        SortOrder::Desc => finder.order_by_desc(OrderCol::CreatedAt),
    };

    let total = finder.clone().count(&state.orm).await? as i64;

    let orders = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(order_from_entity)
        .collect();

    let meta = Meta::new(page, limit, total);
    Ok(ApiResponse::success(
        "Orders",
        OrderList { items: orders },
        Some(meta),
    ))
}

pub async fn statistics(
    state: &AppState,
    user: &AuthUser,
) -> AppResult<ApiResponse<OrderStatistics>> {
    ensure_admin(user)?;

    let count_for = |status: OrderStatus| {
        Orders::find()
            .filter(OrderCol::Status.eq(status))
            .count(&state.orm)
    };

    let total_orders = Orders::find().count(&state.orm).await? as i64;
    let pending_orders = count_for(OrderStatus::Pending).await? as i64;
    let paid_orders = count_for(OrderStatus::Paid).await? as i64;
    let ready_orders = count_for(OrderStatus::Ready).await? as i64;
    let delivered_orders = count_for(OrderStatus::Delivered).await? as i64;
    let cancelled_orders = count_for(OrderStatus::Cancelled).await? as i64;

    // Revenue is summed in decimal arithmetic on our side so the result is
    // exact and reproducible.
    let totals: Vec<Decimal> = Orders::find()
        .select_only()
        .column(OrderCol::Total)
        .filter(OrderCol::Status.is_in([
            OrderStatus::Paid,
            OrderStatus::Ready,
            OrderStatus::Delivered,
        ]))
        .into_tuple()
        .all(&state.orm)
        .await?;
    let total_revenue: Decimal = totals.into_iter().sum();

    Ok(ApiResponse::success(
        "Statistics",
        OrderStatistics {
            total_orders,
            pending_orders,
            paid_orders,
            ready_orders,
            delivered_orders,
            cancelled_orders,
            total_revenue,
        },
        Some(Meta::empty()),
    ))
}

async fn find_locked<C: ConnectionTrait>(conn: &C, id: Uuid) -> AppResult<OrderModel> {
    let order = Orders::find()
        .filter(OrderCol::Id.eq(id))
        .lock(LockType::Update)
        .one(conn)
        .await?;
    order.ok_or(AppError::NotFound)
}

fn ensure_owner_or_admin(user: &AuthUser, order: &OrderModel) -> Result<(), AppError> {
    if user.role == "admin" || order.user_id == Some(user.user_id) {
        Ok(())
    } else {
        Err(AppError::Forbidden)
    }
}

async fn load_items<C: ConnectionTrait>(conn: &C, order_id: Uuid) -> AppResult<Vec<OrderItem>> {
    let rows = OrderItems::find()
        .filter(OrderItemCol::OrderId.eq(order_id))
        .find_also_related(Products)
        .all(conn)
        .await?;

    Ok(rows
        .into_iter()
        .map(|(item, product)| {
            let name = product.map(|p| p.name).unwrap_or_default();
            order_item_from_entity(item, name)
        })
        .collect())
}

fn order_from_entity(model: OrderModel) -> Order {
    Order {
        id: model.id,
        number: model.number,
        user_id: model.user_id,
        customer_name: model.customer_name,
        customer_email: model.customer_email,
        customer_phone: model.customer_phone,
        status: model.status,
        notes: model.notes,
        total: model.total,
        created_at: model.created_at.with_timezone(&Utc),
        updated_at: model.updated_at.with_timezone(&Utc),
    }
}

fn order_item_from_entity(model: OrderItemModel, product_name: String) -> OrderItem {
    OrderItem {
        id: model.id,
        order_id: model.order_id,
        product_id: model.product_id,
        product_name,
        quantity: model.quantity,
        unit_price: model.unit_price,
        line_total: model.unit_price * Decimal::from(model.quantity),
        created_at: model.created_at.with_timezone(&Utc),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dto::orders::OrderItemRequest;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn total_is_exact_decimal_arithmetic() {
        assert_eq!(order_total([(3, dec("4.50"))]), dec("13.50"));
        assert_eq!(
            order_total([(2, dec("19.99")), (1, dec("0.02"))]),
            dec("40.00")
        );
    }

    #[test]
    fn total_of_many_small_lines_stays_exact() {
        // 100 lines of 0.10 must be exactly 10.00, not 9.99…
        let lines = std::iter::repeat_n((1, dec("0.10")), 100);
        assert_eq!(order_total(lines), dec("10.00"));
    }

    #[test]
    fn total_of_no_lines_is_zero() {
        assert_eq!(order_total([]), Decimal::ZERO);
    }

    #[test]
    fn duplicate_product_lines_are_merged() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let items = vec![
            OrderItemRequest {
                product_id: a,
                quantity: 2,
            },
            OrderItemRequest {
                product_id: b,
                quantity: 1,
            },
            OrderItemRequest {
                product_id: a,
                quantity: 3,
            },
        ];
        assert_eq!(merge_lines(&items), vec![(a, 5), (b, 1)]);
    }
}
