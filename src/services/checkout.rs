use crate::{
    config::AppConfig,
    db::DbPool,
    entities::gateway_transaction,
    entities::product::{self, Entity as ProductEntity},
    entities::staged_order::{self, StagedLineItem},
    errors::ServiceError,
    events::{Event, EventSender},
    models::GatewayStatus,
    pesapal::{BillingAddress, PaymentGateway, SubmitOrderRequest},
};
use chrono::Utc;
use rand::Rng;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Serialize, Deserialize, Validate, utoipa::ToSchema)]
pub struct CheckoutItemRequest {
    pub product_id: Uuid,
    #[validate(range(min = 1, message = "Quantity must be at least 1"))]
    pub quantity: i32,
}

#[derive(Debug, Deserialize, Validate, utoipa::ToSchema)]
pub struct CheckoutRequest {
    pub customer_id: Uuid,
    #[validate(length(min = 1, message = "At least one item is required"))]
    pub items: Vec<CheckoutItemRequest>,
    #[validate(email(message = "Invalid email address"))]
    pub email: String,
    #[validate(length(min = 1, message = "Phone number is required"))]
    pub phone_number: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    #[validate(length(min = 1, message = "Delivery address is required"))]
    pub delivery_address: String,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct CheckoutResponse {
    pub merchant_reference: String,
    pub tracking_id: String,
    pub redirect_url: String,
    pub total_amount: Decimal,
    pub currency: String,
}

/// Generates a merchant reference of the form `ORDER-<unix-millis>-<4 digits>`.
///
/// The timestamp component keeps references sortable; the random suffix guards
/// against two checkouts landing on the same millisecond.
pub fn generate_merchant_reference() -> String {
    let millis = Utc::now().timestamp_millis();
    let suffix: u16 = rand::thread_rng().gen_range(1000..10000);
    format!("ORDER-{}-{}", millis, suffix)
}

/// Extracts the order id embedded in a legacy `ORDER-<uuid>` reference.
///
/// Early references embedded the order UUID directly; callbacks for those
/// orders may still arrive, so reference resolution falls back to this.
pub fn extract_legacy_order_id(reference: &str) -> Option<Uuid> {
    reference
        .strip_prefix("ORDER-")
        .and_then(|rest| Uuid::parse_str(rest).ok())
}

/// Initiates orders: validates the cart, prices it, submits the payment
/// request to the gateway, and stages the order until payment resolves.
///
/// Nothing is written to the orders table here. The order only materializes
/// once the gateway confirms payment, so abandoned checkouts never occupy
/// stock or clutter the ledger.
#[derive(Clone)]
pub struct CheckoutService {
    db_pool: Arc<DbPool>,
    gateway: Arc<dyn PaymentGateway>,
    config: Arc<AppConfig>,
    event_sender: EventSender,
}

impl CheckoutService {
    pub fn new(
        db_pool: Arc<DbPool>,
        gateway: Arc<dyn PaymentGateway>,
        config: Arc<AppConfig>,
        event_sender: EventSender,
    ) -> Self {
        Self {
            db_pool,
            gateway,
            config,
            event_sender,
        }
    }

    #[instrument(skip(self, request), fields(customer_id = %request.customer_id, item_count = request.items.len()))]
    pub async fn initiate_checkout(
        &self,
        request: CheckoutRequest,
    ) -> Result<CheckoutResponse, ServiceError> {
        request.validate()?;

        let mut seen = std::collections::HashSet::new();
        for item in &request.items {
            if !seen.insert(item.product_id) {
                return Err(ServiceError::InvalidInput(format!(
                    "Product {} appears more than once in the cart",
                    item.product_id
                )));
            }
        }

        // Price the cart against live product rows. Stock is checked here only
        // as a courtesy; the authoritative deduction happens at completion.
        let mut line_items = Vec::with_capacity(request.items.len());
        let mut subtotal = Decimal::ZERO;
        for item in &request.items {
            let model = ProductEntity::find_by_id(item.product_id)
                .filter(product::Column::IsActive.eq(true))
                .one(&*self.db_pool)
                .await?
                .ok_or_else(|| ServiceError::ProductNotFound(item.product_id.to_string()))?;

            if model.stock_quantity < item.quantity {
                return Err(ServiceError::InsufficientStock(format!(
                    "Product '{}' has {} in stock, {} requested",
                    model.name, model.stock_quantity, item.quantity
                )));
            }

            let total_price = model.price * Decimal::from(item.quantity);
            subtotal += total_price;
            line_items.push(StagedLineItem {
                product_id: model.id,
                quantity: item.quantity,
                unit_price: model.price,
                total_price,
            });
        }

        let total_amount = subtotal + self.config.delivery_fee;
        let currency = self.config.default_currency.clone();
        let merchant_reference = generate_merchant_reference();

        let submit = SubmitOrderRequest {
            id: merchant_reference.clone(),
            currency: currency.clone(),
            amount: total_amount,
            description: format!("AquaMart order {}", merchant_reference),
            callback_url: self.config.gateway.callback_url.clone(),
            notification_id: self.config.gateway.ipn_id.clone(),
            billing_address: BillingAddress {
                email_address: Some(request.email.clone()),
                phone_number: Some(request.phone_number.clone()),
                first_name: request.first_name.clone(),
                last_name: request.last_name.clone(),
                line_1: Some(request.delivery_address.clone()),
                ..Default::default()
            },
        };

        let submission = self.gateway.submit_order(&submit).await?;

        // Record the transaction and the staged cart only after the gateway
        // accepted the order, so every stored tracking id is real.
        staged_order::ActiveModel {
            id: Set(Uuid::new_v4()),
            tracking_id: Set(submission.order_tracking_id.clone()),
            merchant_reference: Set(merchant_reference.clone()),
            customer_id: Set(request.customer_id),
            total_amount: Set(total_amount),
            currency: Set(currency.clone()),
            delivery_address: Set(Some(request.delivery_address.clone())),
            items: Set(json!(line_items)),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.db_pool)
        .await?;

        gateway_transaction::ActiveModel {
            id: Set(Uuid::new_v4()),
            tracking_id: Set(submission.order_tracking_id.clone()),
            merchant_reference: Set(merchant_reference.clone()),
            order_id: Set(None),
            status: Set(GatewayStatus::Pending),
            amount: Set(total_amount),
            currency: Set(currency.clone()),
            description: Set(None),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        }
        .insert(&*self.db_pool)
        .await?;

        self.event_sender
            .send(Event::CheckoutInitiated {
                tracking_id: submission.order_tracking_id.clone(),
                merchant_reference: merchant_reference.clone(),
                customer_id: request.customer_id,
                amount: total_amount,
            })
            .await
            .map_err(ServiceError::EventError)?;

        info!(
            merchant_reference = %merchant_reference,
            tracking_id = %submission.order_tracking_id,
            %total_amount,
            "Checkout initiated"
        );

        Ok(CheckoutResponse {
            merchant_reference,
            tracking_id: submission.order_tracking_id,
            redirect_url: submission.redirect_url,
            total_amount,
            currency,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merchant_reference_shape() {
        let reference = generate_merchant_reference();
        let parts: Vec<&str> = reference.splitn(3, '-').collect();
        assert_eq!(parts[0], "ORDER");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), 4);
        assert!(parts[2].parse::<u16>().is_ok());
    }

    #[test]
    fn merchant_references_are_distinct() {
        let a = generate_merchant_reference();
        let b = generate_merchant_reference();
        assert_ne!(a, b);
    }

    #[test]
    fn empty_cart_fails_validation() {
        let request = CheckoutRequest {
            customer_id: Uuid::new_v4(),
            items: vec![],
            email: "buyer@example.com".to_string(),
            phone_number: "+254700000000".to_string(),
            first_name: None,
            last_name: None,
            delivery_address: "12 Harbour Rd, Mombasa".to_string(),
        };
        let errors = request.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("items"));
    }

    #[test]
    fn legacy_reference_extraction() {
        let id = Uuid::new_v4();
        let reference = format!("ORDER-{}", id);
        assert_eq!(extract_legacy_order_id(&reference), Some(id));

        assert_eq!(extract_legacy_order_id("ORDER-1724832000000-4821"), None);
        assert_eq!(extract_legacy_order_id("not-an-order"), None);
    }
}
