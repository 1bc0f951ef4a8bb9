pub mod callback_log;
pub mod gateway_transaction;
pub mod order;
pub mod order_item;
pub mod product;
pub mod staged_order;
