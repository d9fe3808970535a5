//! Transaction management.
//!
//! This module contains everything related to transactions:
//! - The `Transaction` model and `TransactionBuilder` for creating transactions
//! - Database functions for storing, querying, and managing transactions
//! - JSON route handlers for transactions

mod core;
mod endpoints;
mod query;

pub use core::{
    Transaction, TransactionBuilder, TransactionId, TransactionType, create_transaction,
    create_transaction_table, delete_transaction, get_transaction, map_transaction_row,
    update_transaction,
};
pub use endpoints::{
    TransactionRequest, TransactionState, create_transaction_endpoint,
    delete_transaction_endpoint, get_transaction_endpoint, get_transactions_endpoint,
    update_transaction_endpoint,
};
pub use query::{TransactionQuery, query_transactions};

#[cfg(test)]
pub use core::count_transactions;
