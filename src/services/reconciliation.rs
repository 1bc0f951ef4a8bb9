use crate::{
    config::AppConfig,
    db::DbPool,
    entities::callback_log,
    entities::gateway_transaction::{self, Entity as GatewayTransactionEntity},
    entities::order::{self, Entity as OrderEntity},
    errors::ServiceError,
    events::{Event, EventSender},
    models::{GatewayStatus, PaymentStatus},
    pesapal::{
        ipn::{IpnNotification, NotificationType},
        PaymentGateway,
    },
    services::checkout::extract_legacy_order_id,
    services::payments::{CompletionOutcome, PaymentService},
};
use chrono::{Duration, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, QuerySelect, Set,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Outcome of verifying one transaction against the gateway.
#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResult {
    pub tracking_id: String,
    pub merchant_reference: String,
    pub status: GatewayStatus,
    pub payment_status: Option<PaymentStatus>,
    pub order_id: Option<Uuid>,
    pub message: String,
}

/// Summary of one reconciliation sweep run.
#[derive(Debug, Default, Serialize, utoipa::ToSchema)]
pub struct SweepReport {
    pub total_checked: usize,
    pub fixed: Vec<Uuid>,
    pub already_completed: Vec<Uuid>,
    pub errors: Vec<SweepError>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct SweepError {
    pub tracking_id: String,
    pub error: String,
}

/// Drives payment state from gateway truth.
///
/// Callbacks, on-demand verification, and the periodic sweep all end up in
/// [`ReconciliationService::verify_payment`]: query the gateway, normalize the
/// report, and hand terminal outcomes to the [`PaymentService`]. Inbound
/// notifications are never trusted for the outcome itself, only as a prompt to
/// go ask the gateway.
#[derive(Clone)]
pub struct ReconciliationService {
    db_pool: Arc<DbPool>,
    gateway: Arc<dyn PaymentGateway>,
    payments: PaymentService,
    config: Arc<AppConfig>,
    event_sender: EventSender,
}

impl ReconciliationService {
    pub fn new(
        db_pool: Arc<DbPool>,
        gateway: Arc<dyn PaymentGateway>,
        payments: PaymentService,
        config: Arc<AppConfig>,
        event_sender: EventSender,
    ) -> Self {
        Self {
            db_pool,
            gateway,
            payments,
            config,
            event_sender,
        }
    }

    /// Queries the gateway for the current status of a transaction and applies
    /// the result.
    #[instrument(skip(self), fields(tracking_id = %tracking_id))]
    pub async fn verify_payment(
        &self,
        tracking_id: &str,
    ) -> Result<VerificationResult, ServiceError> {
        let transaction = GatewayTransactionEntity::find()
            .filter(gateway_transaction::Column::TrackingId.eq(tracking_id))
            .one(&*self.db_pool)
            .await?
            .ok_or_else(|| ServiceError::TransactionNotFound(tracking_id.to_string()))?;

        let report = self.gateway.query_status(tracking_id).await?;
        let status =
            GatewayStatus::from_gateway(report.status_code, &report.payment_status_description);

        let (order_id, message) = match status {
            GatewayStatus::Completed => match self.payments.complete_payment(tracking_id).await? {
                CompletionOutcome::Completed { order_id } => {
                    (Some(order_id), "Payment completed".to_string())
                }
                CompletionOutcome::AlreadyCompleted { order_id } => {
                    (Some(order_id), "Payment was already settled".to_string())
                }
            },
            GatewayStatus::Pending => (
                transaction.order_id,
                "Payment still pending at the gateway".to_string(),
            ),
            terminal => {
                self.payments
                    .record_failure(tracking_id, terminal, &report.payment_status_description)
                    .await?;
                (
                    transaction.order_id,
                    format!("Payment {}", terminal.to_string().to_lowercase()),
                )
            }
        };

        Ok(VerificationResult {
            tracking_id: tracking_id.to_string(),
            merchant_reference: transaction.merchant_reference,
            status,
            payment_status: self.order_payment_status(order_id).await?,
            order_id,
            message,
        })
    }

    /// Verifies the authoritative transaction for an order by order id.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn verify_order(&self, order_id: Uuid) -> Result<VerificationResult, ServiceError> {
        let transaction = GatewayTransactionEntity::find()
            .filter(gateway_transaction::Column::OrderId.eq(order_id))
            .one(&*self.db_pool)
            .await?
            .ok_or_else(|| ServiceError::TransactionNotFound(order_id.to_string()))?;
        self.verify_payment(&transaction.tracking_id).await
    }

    /// Handles an inbound gateway notification.
    ///
    /// The raw payload is logged before any processing, so a notification that
    /// cannot be resolved or that fails mid-way still leaves an audit row with
    /// `processed = false` and the error recorded.
    #[instrument(skip(self, notification, raw_payload))]
    pub async fn process_callback(
        &self,
        notification: IpnNotification,
        raw_payload: &str,
    ) -> Result<VerificationResult, ServiceError> {
        let log_id = Uuid::new_v4();
        callback_log::ActiveModel {
            id: Set(log_id),
            tracking_id: Set(notification.order_tracking_id.clone()),
            merchant_reference: Set(notification.order_merchant_reference.clone()),
            notification_type: Set(notification.order_notification_type.clone()),
            raw_payload: Set(raw_payload.to_string()),
            processed: Set(false),
            error: Set(None),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.db_pool)
        .await?;

        self.event_sender
            .send(Event::CallbackReceived {
                tracking_id: notification.order_tracking_id.clone(),
                notification_type: notification.order_notification_type.clone(),
            })
            .await
            .map_err(ServiceError::EventError)?;

        let result = self.resolve_and_verify(&notification).await;
        match &result {
            Ok(verification) => {
                self.mark_log(log_id, true, None).await?;
                info!(
                    tracking_id = %verification.tracking_id,
                    status = %verification.status,
                    "Callback processed"
                );
            }
            Err(err) => {
                warn!(error = %err, "Callback could not be processed");
                self.mark_log(log_id, false, Some(err.to_string())).await?;
            }
        }
        result
    }

    /// Resolves a notification to a stored transaction and acts on its type.
    ///
    /// An explicit COMPLETED or FAILED/CANCELLED type is taken at face value
    /// (the mutation itself is idempotent either way). An ambiguous type
    /// (IPNCHANGE, empty, anything unrecognized) is distrusted and routed
    /// through a live gateway query instead.
    async fn resolve_and_verify(
        &self,
        notification: &IpnNotification,
    ) -> Result<VerificationResult, ServiceError> {
        if !notification.has_identifiers() {
            return Err(ServiceError::BadRequest(
                "Notification carries neither a tracking id nor a merchant reference".to_string(),
            ));
        }

        let transaction = self.resolve_transaction(notification).await?;

        match notification.notification_type() {
            NotificationType::Completed => {
                let outcome = self
                    .payments
                    .complete_payment(&transaction.tracking_id)
                    .await?;
                let message = match outcome {
                    CompletionOutcome::Completed { .. } => "Payment completed".to_string(),
                    CompletionOutcome::AlreadyCompleted { .. } => {
                        "Payment was already settled".to_string()
                    }
                };
                Ok(VerificationResult {
                    tracking_id: transaction.tracking_id,
                    merchant_reference: transaction.merchant_reference,
                    status: GatewayStatus::Completed,
                    payment_status: self.order_payment_status(Some(outcome.order_id())).await?,
                    order_id: Some(outcome.order_id()),
                    message,
                })
            }
            NotificationType::Failed => {
                self.record_notified_failure(transaction, GatewayStatus::Failed)
                    .await
            }
            NotificationType::Cancelled => {
                self.record_notified_failure(transaction, GatewayStatus::Cancelled)
                    .await
            }
            NotificationType::Ambiguous => self.verify_payment(&transaction.tracking_id).await,
        }
    }

    async fn record_notified_failure(
        &self,
        transaction: gateway_transaction::Model,
        status: GatewayStatus,
    ) -> Result<VerificationResult, ServiceError> {
        let reason = format!("Gateway notification reported {}", status);
        self.payments
            .record_failure(&transaction.tracking_id, status, &reason)
            .await?;
        Ok(VerificationResult {
            tracking_id: transaction.tracking_id.clone(),
            merchant_reference: transaction.merchant_reference,
            status,
            payment_status: self.order_payment_status(transaction.order_id).await?,
            order_id: transaction.order_id,
            message: format!("Payment {}", status.to_string().to_lowercase()),
        })
    }

    /// Resolution order: tracking id as given, then merchant reference, then the
    /// order id embedded in a legacy `ORDER-<uuid>` reference.
    async fn resolve_transaction(
        &self,
        notification: &IpnNotification,
    ) -> Result<gateway_transaction::Model, ServiceError> {
        if let Some(tracking_id) = &notification.order_tracking_id {
            if let Some(transaction) = GatewayTransactionEntity::find()
                .filter(gateway_transaction::Column::TrackingId.eq(tracking_id.as_str()))
                .one(&*self.db_pool)
                .await?
            {
                return Ok(transaction);
            }
        }

        if let Some(reference) = &notification.order_merchant_reference {
            if let Some(transaction) = GatewayTransactionEntity::find()
                .filter(gateway_transaction::Column::MerchantReference.eq(reference.as_str()))
                .one(&*self.db_pool)
                .await?
            {
                return Ok(transaction);
            }

            if let Some(order_id) = extract_legacy_order_id(reference) {
                if let Some(transaction) = GatewayTransactionEntity::find()
                    .filter(gateway_transaction::Column::OrderId.eq(order_id))
                    .one(&*self.db_pool)
                    .await?
                {
                    return Ok(transaction);
                }
            }
        }

        Err(ServiceError::TransactionNotFound(
            notification
                .order_tracking_id
                .clone()
                .or_else(|| notification.order_merchant_reference.clone())
                .unwrap_or_default(),
        ))
    }

    /// One reconciliation sweep run.
    ///
    /// Phase one re-drives transactions the gateway already confirmed
    /// (stored status COMPLETED) whose order is missing or not completed —
    /// these are interrupted completions and need no gateway round trip.
    /// Phase two re-verifies transactions still PENDING after the configured
    /// minimum age, catching notifications that never arrived.
    ///
    /// One bad transaction never aborts the run; its error is recorded in the
    /// report and the sweep moves on.
    #[instrument(skip(self))]
    pub async fn run_sweep(&self) -> Result<SweepReport, ServiceError> {
        let mut report = SweepReport::default();

        let confirmed = GatewayTransactionEntity::find()
            .filter(gateway_transaction::Column::Status.eq(GatewayStatus::Completed))
            .order_by_asc(gateway_transaction::Column::CreatedAt)
            .limit(self.config.sweep_batch_size)
            .all(&*self.db_pool)
            .await?;

        for transaction in confirmed {
            if self.order_is_completed(transaction.order_id).await? {
                continue;
            }
            report.total_checked += 1;
            match self.payments.complete_payment(&transaction.tracking_id).await {
                Ok(CompletionOutcome::Completed { order_id }) => {
                    report.fixed.push(order_id);
                    info!(
                        tracking_id = %transaction.tracking_id,
                        order_id = %order_id,
                        "Sweep repaired an interrupted completion"
                    );
                }
                Ok(CompletionOutcome::AlreadyCompleted { order_id }) => {
                    report.already_completed.push(order_id);
                }
                Err(err) => {
                    error!(tracking_id = %transaction.tracking_id, error = %err, "Sweep could not repair transaction");
                    report.errors.push(SweepError {
                        tracking_id: transaction.tracking_id,
                        error: err.to_string(),
                    });
                }
            }
        }

        let cutoff = Utc::now() - Duration::seconds(self.config.sweep_pending_min_age_secs);
        let stale_pending = GatewayTransactionEntity::find()
            .filter(gateway_transaction::Column::Status.eq(GatewayStatus::Pending))
            .filter(gateway_transaction::Column::CreatedAt.lt(cutoff))
            .order_by_asc(gateway_transaction::Column::CreatedAt)
            .limit(self.config.sweep_batch_size)
            .all(&*self.db_pool)
            .await?;

        for transaction in stale_pending {
            report.total_checked += 1;
            match self.verify_payment(&transaction.tracking_id).await {
                Ok(result) if result.status == GatewayStatus::Completed => {
                    if let Some(order_id) = result.order_id {
                        report.fixed.push(order_id);
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    error!(tracking_id = %transaction.tracking_id, error = %err, "Sweep could not verify transaction");
                    report.errors.push(SweepError {
                        tracking_id: transaction.tracking_id,
                        error: err.to_string(),
                    });
                }
            }
        }

        self.event_sender
            .send(Event::SweepCompleted {
                total_checked: report.total_checked,
                fixed: report.fixed.len(),
                errors: report.errors.len(),
            })
            .await
            .map_err(ServiceError::EventError)?;

        info!(
            total_checked = report.total_checked,
            fixed = report.fixed.len(),
            already_completed = report.already_completed.len(),
            errors = report.errors.len(),
            "Reconciliation sweep finished"
        );
        Ok(report)
    }

    async fn order_payment_status(
        &self,
        order_id: Option<Uuid>,
    ) -> Result<Option<PaymentStatus>, ServiceError> {
        let Some(order_id) = order_id else {
            return Ok(None);
        };
        Ok(OrderEntity::find_by_id(order_id)
            .one(&*self.db_pool)
            .await?
            .map(|order| order.payment_status))
    }

    async fn order_is_completed(&self, order_id: Option<Uuid>) -> Result<bool, ServiceError> {
        let Some(order_id) = order_id else {
            return Ok(false);
        };
        let order = OrderEntity::find_by_id(order_id)
            .one(&*self.db_pool)
            .await?;
        Ok(matches!(
            order,
            Some(order::Model {
                payment_status: PaymentStatus::Completed,
                ..
            }) | Some(order::Model {
                payment_status: PaymentStatus::Refunded,
                ..
            })
        ))
    }

    async fn mark_log(
        &self,
        log_id: Uuid,
        processed: bool,
        error: Option<String>,
    ) -> Result<(), ServiceError> {
        let Some(log) = callback_log::Entity::find_by_id(log_id)
            .one(&*self.db_pool)
            .await?
        else {
            return Ok(());
        };
        let mut active: callback_log::ActiveModel = log.into();
        active.processed = Set(processed);
        active.error = Set(error);
        active.update(&*self.db_pool).await?;
        Ok(())
    }
}
