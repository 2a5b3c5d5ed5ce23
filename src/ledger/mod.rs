// ABOUTME: Ledger module - per-user resource and reward balances.
// ABOUTME: Every mutation is atomic per user.

mod ledger;

pub use ledger::{ResourceLedger, UserAccount};
