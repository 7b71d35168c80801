// ============================================================================
// Domain Layer - Business Logic
// ============================================================================
//
// Order lifecycle rules, independent of polling, HTTP and storage.
//
// ============================================================================

pub mod order;
