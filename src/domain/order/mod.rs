// ============================================================================
// Order Domain
// ============================================================================
//
// Pure order rules with no I/O:
// - Value objects (OrderStatus, PaymentStatus, AlertStatus)
// - Status step classification used by the lifecycle engine
// - Placement validation (items, quantities, total)
// - Errors (OrderError enum)
//
// ============================================================================

pub mod errors;
pub mod rules;
pub mod value_objects;

pub use errors::*;
pub use rules::*;
pub use value_objects::*;
