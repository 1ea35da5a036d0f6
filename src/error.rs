use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::entity::orders::OrderStatus;
use crate::response::{ApiResponse, Meta};

/// One rejected line item of an order request.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ItemIssue {
    pub product_id: Uuid,
    pub reason: ItemIssueReason,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ItemIssueReason {
    UnknownProduct,
    ProductUnavailable,
    NonPositiveQuantity,
    InsufficientStock { requested: i32, available: i32 },
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not Found")]
    NotFound,

    #[error("Bad Request {0}")]
    BadRequest(String),

    #[error("Forbidden")]
    Forbidden,

    #[error("Order validation failed")]
    Validation(Vec<ItemIssue>),

    #[error("Insufficient stock")]
    InsufficientStock(Vec<ItemIssue>),

    #[error("Invalid transition from {from:?} to {to:?}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    #[error("Order already cancelled")]
    AlreadyCancelled,

    #[error("Cannot cancel a delivered order")]
    AlreadyDelivered,

    #[error("Store unavailable")]
    StoreUnavailable,

    #[error("Database error")]
    DbError(#[from] sqlx::Error),

    #[error("ORM error")]
    OrmError(sea_orm::DbErr),

    #[error("Internal Server Error")]
    Internal(#[from] anyhow::Error),
}

impl From<sea_orm::DbErr> for AppError {
    fn from(err: sea_orm::DbErr) -> Self {
        // A lost connection surfaces as a retryable failure; nothing partial
        // was committed because every engine operation runs in one transaction.
        match err {
            sea_orm::DbErr::Conn(_) | sea_orm::DbErr::ConnectionAcquire(_) => {
                AppError::StoreUnavailable
            }
            other => AppError::OrmError(other),
        }
    }
}

#[derive(Serialize)]
struct ErrorData {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    items: Option<Vec<ItemIssue>>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) | AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::InsufficientStock(_)
            | AppError::InvalidTransition { .. }
            | AppError::AlreadyCancelled
            | AppError::AlreadyDelivered => StatusCode::CONFLICT,
            AppError::StoreUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            AppError::DbError(_) | AppError::OrmError(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let items = match &self {
            AppError::Validation(items) | AppError::InsufficientStock(items) => {
                Some(items.clone())
            }
            _ => None,
        };

        let body = ApiResponse {
            message: self.to_string(),
            data: Some(ErrorData {
                error: self.to_string(),
                items,
            }),
            meta: Some(Meta::empty()),
        };

        (status, axum::Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
