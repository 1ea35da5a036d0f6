use utoipa::{
    Modify, OpenApi,
    openapi::{
        self,
        OpenApi as OpenApiSpec,
        security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    },
};
use utoipa_scalar::{Scalar, Servable};

use crate::{
    dto::{
        orders::{
            CreateOrderRequest, OrderItemRequest, OrderList, OrderStatistics, OrderWithItems,
            UpdateOrderStatusRequest,
        },
        products::{AdjustStockRequest, CreateProductRequest, ProductList, UpdateProductRequest},
    },
    entity::{orders::OrderStatus, products::ProductCategory},
    error::{ItemIssue, ItemIssueReason},
    models::{Order, OrderItem, Product, StockStatus},
    response::{ApiResponse, Meta},
    routes::{health, orders, params, products},
};

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health_check,
        products::list_products,
        products::create_product,
        products::get_product,
        products::update_product,
        products::delete_product,
        products::toggle_availability,
        products::adjust_stock,
        products::list_low_stock,
        products::list_out_of_stock,
        orders::create_order,
        orders::list_orders,
        orders::statistics,
        orders::get_order,
        orders::confirm_order,
        orders::cancel_order,
        orders::advance_status,
    ),
    components(
        schemas(
            Product,
            Order,
            OrderItem,
            OrderStatus,
            ProductCategory,
            StockStatus,
            ItemIssue,
            ItemIssueReason,
            CreateProductRequest,
            UpdateProductRequest,
            AdjustStockRequest,
            ProductList,
            CreateOrderRequest,
            OrderItemRequest,
            UpdateOrderStatusRequest,
            OrderList,
            OrderWithItems,
            OrderStatistics,
            params::Pagination,
            params::ProductQuery,
            params::OrderListQuery,
            params::LowStockQuery,
            Meta,
            ApiResponse<Product>,
            ApiResponse<ProductList>,
            ApiResponse<OrderWithItems>,
            ApiResponse<OrderList>,
            ApiResponse<OrderStatistics>
        )
    ),
    security(
        ("bearer_auth" = [])
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Health check endpoint"),
        (name = "Products", description = "Catalog and stock endpoints"),
        (name = "Orders", description = "Order lifecycle endpoints"),
    )
)]
pub struct ApiDoc;

pub fn scalar_docs() -> Scalar<OpenApiSpec> {
    Scalar::with_url("/docs", ApiDoc::openapi())
}
