pub mod stock_transaction_repository;

pub use stock_transaction_repository::{
    NewStockTransaction, RecordUpdate, SortField, StockTransactionRepository, TransactionFilter,
};
