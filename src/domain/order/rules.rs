use std::collections::BTreeMap;

use super::errors::OrderError;

// ============================================================================
// Order Placement Rules
// ============================================================================

/// Validate the (product, quantity) lines of an order about to be placed.
pub fn validate_lines<'a>(
    lines: impl IntoIterator<Item = (&'a str, i32)>,
    total_cents: i64,
) -> Result<(), OrderError> {
    let mut any = false;

    for (product_id, quantity) in lines {
        any = true;
        if quantity <= 0 {
            return Err(OrderError::InvalidQuantity {
                product_id: product_id.to_string(),
                quantity,
            });
        }
    }

    if !any {
        return Err(OrderError::EmptyItems);
    }
    if total_cents < 0 {
        return Err(OrderError::NegativeTotal(total_cents));
    }

    Ok(())
}

/// Sum quantities per product. The same product can appear on several lines
/// (different notes); stock checks must see the combined demand. Keys come
/// out sorted, which also gives a stable row-locking order.
pub fn demand_by_product<'a>(lines: impl IntoIterator<Item = (&'a str, i32)>) -> BTreeMap<String, i32> {
    let mut demand = BTreeMap::new();
    for (product_id, quantity) in lines {
        *demand.entry(product_id.to_string()).or_insert(0) += quantity;
    }
    demand
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_order_is_rejected() {
        let lines: Vec<(&str, i32)> = vec![];
        assert_eq!(validate_lines(lines, 0), Err(OrderError::EmptyItems));
    }

    #[test]
    fn test_non_positive_quantity_is_rejected() {
        let err = validate_lines(vec![("pizza", 1), ("soda", 0)], 1500).unwrap_err();
        assert_eq!(
            err,
            OrderError::InvalidQuantity {
                product_id: "soda".to_string(),
                quantity: 0
            }
        );
    }

    #[test]
    fn test_negative_total_is_rejected() {
        assert_eq!(
            validate_lines(vec![("pizza", 1)], -1),
            Err(OrderError::NegativeTotal(-1))
        );
    }

    #[test]
    fn test_demand_merges_repeated_products() {
        let demand = demand_by_product(vec![("pizza", 1), ("soda", 2), ("pizza", 3)]);
        assert_eq!(demand.get("pizza"), Some(&4));
        assert_eq!(demand.get("soda"), Some(&2));
        assert_eq!(demand.keys().cloned().collect::<Vec<_>>(), vec!["pizza", "soda"]);
    }
}
