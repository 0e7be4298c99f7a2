//! Sales domain module (point-of-sale transactions).
//!
//! Pricing of a sale against catalog state, the persisted transaction shape with
//! its frozen line snapshots, and the `completed → voided` transition. Pure domain
//! logic; stock deduction happens through the inventory ledger in the infra layer.

pub mod pricing;
pub mod transaction;

pub use pricing::{CreateTransaction, PaymentRequest, PricedLine, PricedSale, SaleLineRequest, price_sale};
pub use transaction::{
    Payment, PaymentMethod, Transaction, TransactionItem, TransactionStatus,
    format_transaction_number,
};
