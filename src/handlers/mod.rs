pub mod checkout;
pub mod orders;
pub mod payment_callbacks;
pub mod payment_status;
pub mod products;
