use thiserror::Error;

use crate::store::order::OrderStatus;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    /// A concurrent writer already transitioned the order out of the statuses
    /// this mutation is allowed from. Callers implement "first verification
    /// wins" on top of this.
    #[error("order {order_ref} already transitioned to {actual}")]
    Conflict {
        order_ref: String,
        actual: OrderStatus,
    },

    #[error("duplicate order reference: {order_ref}")]
    DuplicateRef { order_ref: String },

    #[error("query failed: {message}")]
    Query { message: String },
}

impl StoreError {
    pub fn not_found(entity: &'static str, key: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            key: key.into(),
        }
    }

    pub fn conflict(order_ref: impl Into<String>, actual: OrderStatus) -> Self {
        Self::Conflict {
            order_ref: order_ref.into(),
            actual,
        }
    }

    pub fn query(message: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Map a SQLx error to the store taxonomy. Unique violations surface as
    /// `DuplicateRef` so the caller can regenerate a reference and retry.
    pub fn from_sqlx(error: sqlx::Error) -> Self {
        match error {
            sqlx::Error::RowNotFound => Self::not_found("record", "unknown"),
            sqlx::Error::Database(db_err) => match db_err.code().as_deref() {
                Some("23505") => Self::DuplicateRef {
                    order_ref: "unknown".to_string(),
                },
                // Foreign key violation: the referenced order does not exist.
                Some("23503") => Self::not_found("order", "unknown"),
                _ => Self::query(db_err.message().to_string()),
            },
            other => Self::query(other.to_string()),
        }
    }
}
