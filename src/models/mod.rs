pub mod status;

pub use status::{DeliveryStatus, GatewayStatus, PaymentEvent, PaymentStatus};
