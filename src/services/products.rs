use crate::{
    db::DbPool,
    entities::product::{self, Entity as ProductEntity},
    errors::ServiceError,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Serialize, Deserialize, Validate, utoipa::ToSchema)]
pub struct CreateProductRequest {
    #[validate(length(min = 1, max = 255, message = "Product name is required"))]
    pub name: String,
    pub description: Option<String>,
    #[validate(length(min = 1, max = 64, message = "SKU is required"))]
    pub sku: String,
    pub price: Decimal,
    #[validate(range(min = 0, message = "Stock cannot be negative"))]
    pub stock_quantity: i32,
}

#[derive(Debug, Serialize, Deserialize, Validate, utoipa::ToSchema)]
pub struct UpdateProductRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<Decimal>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize, Validate, utoipa::ToSchema)]
pub struct AdjustStockRequest {
    /// Signed adjustment; negative values deduct, floored at zero.
    pub adjustment: i32,
    pub reason: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ProductResponse {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub sku: String,
    pub price: Decimal,
    pub stock_quantity: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ProductListResponse {
    pub products: Vec<ProductResponse>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

impl From<product::Model> for ProductResponse {
    fn from(model: product::Model) -> Self {
        Self {
            id: model.id,
            name: model.name,
            description: model.description,
            sku: model.sku,
            price: model.price,
            stock_quantity: model.stock_quantity,
            is_active: model.is_active,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

/// Catalog and stock management.
#[derive(Clone)]
pub struct ProductService {
    db_pool: Arc<DbPool>,
}

impl ProductService {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    #[instrument(skip(self, request), fields(sku = %request.sku))]
    pub async fn create_product(
        &self,
        request: CreateProductRequest,
    ) -> Result<ProductResponse, ServiceError> {
        request.validate()?;

        if ProductEntity::find()
            .filter(product::Column::Sku.eq(request.sku.as_str()))
            .one(&*self.db_pool)
            .await?
            .is_some()
        {
            return Err(ServiceError::Conflict(format!(
                "SKU '{}' already exists",
                request.sku
            )));
        }

        let now = Utc::now();
        let model = product::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(request.name),
            description: Set(request.description),
            sku: Set(request.sku),
            price: Set(request.price),
            stock_quantity: Set(request.stock_quantity),
            is_active: Set(true),
            created_at: Set(now),
            updated_at: Set(Some(now)),
        };

        let created = model.insert(&*self.db_pool).await.map_err(|e| {
            error!(error = %e, "Failed to create product");
            ServiceError::DatabaseError(e)
        })?;

        info!(product_id = %created.id, sku = %created.sku, "Product created");
        Ok(created.into())
    }

    #[instrument(skip(self))]
    pub async fn get_product(&self, product_id: Uuid) -> Result<ProductResponse, ServiceError> {
        ProductEntity::find_by_id(product_id)
            .one(&*self.db_pool)
            .await?
            .map(Into::into)
            .ok_or_else(|| ServiceError::ProductNotFound(product_id.to_string()))
    }

    #[instrument(skip(self))]
    pub async fn list_products(
        &self,
        page: u64,
        per_page: u64,
    ) -> Result<ProductListResponse, ServiceError> {
        let paginator = ProductEntity::find()
            .filter(product::Column::IsActive.eq(true))
            .order_by_asc(product::Column::Name)
            .paginate(&*self.db_pool, per_page);

        let total = paginator.num_items().await?;
        let products = paginator
            .fetch_page(page.saturating_sub(1))
            .await?
            .into_iter()
            .map(Into::into)
            .collect();

        Ok(ProductListResponse {
            products,
            total,
            page,
            per_page,
        })
    }

    #[instrument(skip(self, request))]
    pub async fn update_product(
        &self,
        product_id: Uuid,
        request: UpdateProductRequest,
    ) -> Result<ProductResponse, ServiceError> {
        let existing = ProductEntity::find_by_id(product_id)
            .one(&*self.db_pool)
            .await?
            .ok_or_else(|| ServiceError::ProductNotFound(product_id.to_string()))?;

        let mut active: product::ActiveModel = existing.into();
        if let Some(name) = request.name {
            active.name = Set(name);
        }
        if let Some(description) = request.description {
            active.description = Set(Some(description));
        }
        if let Some(price) = request.price {
            active.price = Set(price);
        }
        if let Some(is_active) = request.is_active {
            active.is_active = Set(is_active);
        }
        active.updated_at = Set(Some(Utc::now()));

        let updated = active.update(&*self.db_pool).await?;
        info!(product_id = %product_id, "Product updated");
        Ok(updated.into())
    }

    /// Applies a signed stock adjustment. Deductions clamp at zero.
    #[instrument(skip(self))]
    pub async fn adjust_stock(
        &self,
        product_id: Uuid,
        request: AdjustStockRequest,
    ) -> Result<ProductResponse, ServiceError> {
        if request.adjustment < 0 {
            deduct_stock_floored(&*self.db_pool, product_id, -request.adjustment).await?;
        } else if request.adjustment > 0 {
            let result = ProductEntity::update_many()
                .col_expr(
                    product::Column::StockQuantity,
                    Expr::col(product::Column::StockQuantity).add(request.adjustment),
                )
                .col_expr(product::Column::UpdatedAt, Expr::value(Utc::now()))
                .filter(product::Column::Id.eq(product_id))
                .exec(&*self.db_pool)
                .await?;
            if result.rows_affected == 0 {
                return Err(ServiceError::ProductNotFound(product_id.to_string()));
            }
        } else {
            warn!(product_id = %product_id, "Zero stock adjustment requested");
        }

        if let Some(reason) = &request.reason {
            info!(product_id = %product_id, adjustment = request.adjustment, reason = %reason, "Stock adjusted");
        }
        self.get_product(product_id).await
    }
}

/// Deducts `quantity` from a product's stock in a single atomic update, floored
/// at zero. Returns the remaining stock.
///
/// The CASE expression keeps the read-modify-write entirely inside the database,
/// so two completions racing on the same product can never lose an update.
pub(crate) async fn deduct_stock_floored<C: ConnectionTrait>(
    conn: &C,
    product_id: Uuid,
    quantity: i32,
) -> Result<i32, ServiceError> {
    debug_assert!(quantity >= 0);

    let deduction = Expr::case(
        Expr::col(product::Column::StockQuantity).gte(quantity),
        Expr::col(product::Column::StockQuantity).sub(quantity),
    )
    .finally(0);

    let result = ProductEntity::update_many()
        .col_expr(product::Column::StockQuantity, deduction.into())
        .col_expr(product::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(product::Column::Id.eq(product_id))
        .exec(conn)
        .await?;

    if result.rows_affected == 0 {
        return Err(ServiceError::ProductNotFound(product_id.to_string()));
    }

    let remaining = ProductEntity::find_by_id(product_id)
        .one(conn)
        .await?
        .map(|p| p.stock_quantity)
        .ok_or_else(|| ServiceError::ProductNotFound(product_id.to_string()))?;

    Ok(remaining)
}
