pub mod stock_transaction;
