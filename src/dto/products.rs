use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::entity::products::ProductCategory;
use crate::models::Product;

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateProductRequest {
    pub name: String,
    pub description: Option<String>,
    pub price: Decimal,
    pub stock: i32,
    pub category: ProductCategory,
    pub available: Option<bool>,
}

/// Stock is deliberately absent here: it only moves through the stock ledger.
#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateProductRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<Decimal>,
    pub category: Option<ProductCategory>,
    pub available: Option<bool>,
}

/// Either a relative delta or an absolute stock count, not both.
#[derive(Debug, Deserialize, ToSchema)]
pub struct AdjustStockRequest {
    pub delta: Option<i32>,
    pub stock: Option<i32>,
}

#[derive(Serialize, ToSchema)]
pub struct ProductList {
    pub items: Vec<Product>,
}
