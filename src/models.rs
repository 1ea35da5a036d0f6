use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::entity::orders::OrderStatus;
use crate::entity::products::ProductCategory;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum StockStatus {
    Unavailable,
    OutOfStock,
    LowStock,
    InStock,
}

pub const LOW_STOCK_THRESHOLD: i32 = 5;

/// Derive the displayed stock status from availability and count.
pub fn stock_status(available: bool, stock: i32) -> StockStatus {
    if !available {
        StockStatus::Unavailable
    } else if stock == 0 {
        StockStatus::OutOfStock
    } else if stock <= LOW_STOCK_THRESHOLD {
        StockStatus::LowStock
    } else {
        StockStatus::InStock
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub price: Decimal,
    pub stock: i32,
    pub available: bool,
    pub category: ProductCategory,
    pub stock_status: StockStatus,
    pub is_in_stock: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct Order {
    pub id: Uuid,
    pub number: i64,
    pub user_id: Option<Uuid>,
    pub customer_name: String,
    pub customer_email: Option<String>,
    pub customer_phone: Option<String>,
    pub status: OrderStatus,
    pub notes: Option<String>,
    pub total: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub product_name: String,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub line_total: Decimal,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stock_status_derivation() {
        assert_eq!(stock_status(false, 100), StockStatus::Unavailable);
        assert_eq!(stock_status(true, 0), StockStatus::OutOfStock);
        assert_eq!(stock_status(true, 1), StockStatus::LowStock);
        assert_eq!(stock_status(true, 5), StockStatus::LowStock);
        assert_eq!(stock_status(true, 6), StockStatus::InStock);
    }

    #[test]
    fn unavailable_wins_over_stock_count() {
        assert_eq!(stock_status(false, 0), StockStatus::Unavailable);
        assert_eq!(stock_status(false, 3), StockStatus::Unavailable);
    }
}
