// Reconciliation of gateway confirmations, cash receipts and manual
// assignments against the tenant ledger

pub mod engine;

pub use engine::ReconciliationEngine;
