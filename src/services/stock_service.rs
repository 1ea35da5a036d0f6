//! Stock ledger: the only code allowed to mutate a product's stock count.
//!
//! `reserve` and `release` are conditional single-row updates, so two
//! concurrent reservations against the same product serialize on the row
//! and can never drive stock negative. `set_absolute` is the administrative
//! override and sits outside the reservation protocol.

use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter};
use uuid::Uuid;

use crate::{
    entity::products::{Column, Entity as Products},
    error::{AppError, AppResult, ItemIssue, ItemIssueReason},
};

/// Atomically decrement stock by `quantity` if at least that much is left.
///
/// The `stock >= quantity` filter makes the decrement race-safe without a
/// process-wide lock: the database serializes updates per product row.
pub async fn reserve<C: ConnectionTrait>(
    conn: &C,
    product_id: Uuid,
    quantity: i32,
) -> AppResult<()> {
    if quantity <= 0 {
        return Err(AppError::Validation(vec![ItemIssue {
            product_id,
            reason: ItemIssueReason::NonPositiveQuantity,
        }]));
    }

    let result = Products::update_many()
        .col_expr(Column::Stock, Expr::col(Column::Stock).sub(quantity))
        .col_expr(Column::UpdatedAt, Expr::current_timestamp().into())
        .filter(Column::Id.eq(product_id))
        .filter(Column::Stock.gte(quantity))
        .exec(conn)
        .await?;

    if result.rows_affected > 0 {
        return Ok(());
    }

    // The conditional update matched nothing: either the product is gone or
    // its stock is short. Look it up once to report which.
    match Products::find_by_id(product_id).one(conn).await? {
        None => Err(AppError::Validation(vec![ItemIssue {
            product_id,
            reason: ItemIssueReason::UnknownProduct,
        }])),
        Some(product) => Err(AppError::InsufficientStock(vec![ItemIssue {
            product_id,
            reason: ItemIssueReason::InsufficientStock {
                requested: quantity,
                available: product.stock,
            },
        }])),
    }
}

/// Atomically give `quantity` units back, reversing a reservation.
///
/// Releasing against a product that no longer exists is an anomaly, not a
/// failure: the cancellation must still go through.
pub async fn release<C: ConnectionTrait>(
    conn: &C,
    product_id: Uuid,
    quantity: i32,
) -> AppResult<()> {
    let result = Products::update_many()
        .col_expr(Column::Stock, Expr::col(Column::Stock).add(quantity))
        .col_expr(Column::UpdatedAt, Expr::current_timestamp().into())
        .filter(Column::Id.eq(product_id))
        .exec(conn)
        .await?;

    if result.rows_affected == 0 {
        tracing::warn!(%product_id, quantity, "stock release on missing product, skipped");
    }

    Ok(())
}

/// Administrative override: set stock to an arbitrary non-negative value,
/// bypassing the reservation protocol.
pub async fn set_absolute<C: ConnectionTrait>(
    conn: &C,
    product_id: Uuid,
    new_stock: i32,
) -> AppResult<()> {
    if new_stock < 0 {
        return Err(AppError::BadRequest("stock cannot be negative".into()));
    }

    let result = Products::update_many()
        .col_expr(Column::Stock, Expr::value(new_stock))
        .col_expr(Column::UpdatedAt, Expr::current_timestamp().into())
        .filter(Column::Id.eq(product_id))
        .exec(conn)
        .await?;

    if result.rows_affected == 0 {
        return Err(AppError::NotFound);
    }

    Ok(())
}
