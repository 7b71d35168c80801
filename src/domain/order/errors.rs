// ============================================================================
// Order Business Rule Errors
// ============================================================================

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OrderError {
    #[error("Order items cannot be empty")]
    EmptyItems,

    #[error("Invalid quantity {quantity} for product {product_id}")]
    InvalidQuantity { product_id: String, quantity: i32 },

    #[error("Order total cannot be negative: {0}")]
    NegativeTotal(i64),

    #[error("Unknown status value: {0}")]
    UnknownStatus(String),
}
