pub mod stock;

pub use stock::{
    DeleteOutcome, IssueRequest, ListFilter, ReceiveRequest, StockService, TransactionPatch,
};
