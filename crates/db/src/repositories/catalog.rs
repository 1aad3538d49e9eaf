use async_trait::async_trait;
use sqlx::{sqlite::SqliteRow, Row};

use procura_core::domain::product::{Product, ProductId};
use procura_core::domain::supplier::{Supplier, SupplierId};

use super::codec::{format_timestamp, is_foreign_key_violation, parse_timestamp};
use super::{ProductRepository, RepositoryError, SupplierRepository};
use crate::DbPool;

const SUPPLIER_COLUMNS: &str = "id, name, email, description, insights, image_url, created_at";

/// Supplier and product catalog. Read-mostly; the negotiation flow only refreshes insights.
#[derive(Clone)]
pub struct SqlCatalogRepository {
    pool: DbPool,
}

impl SqlCatalogRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SupplierRepository for SqlCatalogRepository {
    async fn list_suppliers(&self) -> Result<Vec<Supplier>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {SUPPLIER_COLUMNS} FROM supplier ORDER BY name COLLATE NOCASE ASC, id ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(supplier_from_row).collect()
    }

    async fn find_supplier(&self, id: &SupplierId) -> Result<Option<Supplier>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {SUPPLIER_COLUMNS} FROM supplier WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(supplier_from_row).transpose()
    }

    async fn find_suppliers_by_email(
        &self,
        address: &str,
    ) -> Result<Vec<Supplier>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {SUPPLIER_COLUMNS} FROM supplier
             WHERE email IS NOT NULL AND trim(email) = trim(?) COLLATE NOCASE
             ORDER BY id ASC"
        ))
        .bind(address)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(supplier_from_row).collect()
    }

    async fn find_suppliers_by_prefix(
        &self,
        prefix: &str,
    ) -> Result<Vec<Supplier>, RepositoryError> {
        let prefix = prefix.trim().to_ascii_lowercase();
        if prefix.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(&format!(
            "SELECT {SUPPLIER_COLUMNS} FROM supplier
             WHERE substr(lower(id), 1, length(?)) = ?
             ORDER BY id ASC"
        ))
        .bind(&prefix)
        .bind(&prefix)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(supplier_from_row).collect()
    }

    async fn save_supplier(&self, supplier: Supplier) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO supplier (id, name, email, description, insights, image_url, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                email = excluded.email,
                description = excluded.description,
                insights = excluded.insights,
                image_url = excluded.image_url",
        )
        .bind(&supplier.id.0)
        .bind(&supplier.name)
        .bind(&supplier.email)
        .bind(&supplier.description)
        .bind(&supplier.insights)
        .bind(&supplier.image_url)
        .bind(format_timestamp(supplier.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_insights(
        &self,
        id: &SupplierId,
        insights: &str,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query("UPDATE supplier SET insights = ? WHERE id = ?")
            .bind(insights)
            .bind(&id.0)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::not_found("supplier", id.0.clone()));
        }
        Ok(())
    }
}

#[async_trait]
impl ProductRepository for SqlCatalogRepository {
    async fn list_products(&self) -> Result<Vec<Product>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, supplier_id, name, created_at FROM product
             ORDER BY name COLLATE NOCASE ASC, id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(product_from_row).collect()
    }

    async fn find_product(&self, id: &ProductId) -> Result<Option<Product>, RepositoryError> {
        let row = sqlx::query("SELECT id, supplier_id, name, created_at FROM product WHERE id = ?")
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(product_from_row).transpose()
    }

    async fn search_products(&self, query: &str) -> Result<Vec<Product>, RepositoryError> {
        let needle = query.trim().to_ascii_lowercase();
        let rows = sqlx::query(
            "SELECT id, supplier_id, name, created_at FROM product
             WHERE instr(lower(name), ?) > 0
             ORDER BY name COLLATE NOCASE ASC, id ASC",
        )
        .bind(&needle)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(product_from_row).collect()
    }

    async fn save_product(&self, product: Product) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO product (id, supplier_id, name, created_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                supplier_id = excluded.supplier_id,
                name = excluded.name",
        )
        .bind(&product.id.0)
        .bind(product.supplier_id.as_ref().map(|id| id.0.as_str()))
        .bind(&product.name)
        .bind(format_timestamp(product.created_at))
        .execute(&self.pool)
        .await
        .map_err(|error| {
            if is_foreign_key_violation(&error) {
                RepositoryError::not_found(
                    "supplier",
                    product.supplier_id.as_ref().map(|id| id.0.clone()).unwrap_or_default(),
                )
            } else {
                RepositoryError::Database(error)
            }
        })?;
        Ok(())
    }
}

fn supplier_from_row(row: SqliteRow) -> Result<Supplier, RepositoryError> {
    Ok(Supplier {
        id: SupplierId(row.try_get("id")?),
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        description: row.try_get("description")?,
        insights: row.try_get("insights")?,
        image_url: row.try_get("image_url")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

fn product_from_row(row: SqliteRow) -> Result<Product, RepositoryError> {
    let supplier_id: Option<String> = row.try_get("supplier_id")?;
    Ok(Product {
        id: ProductId(row.try_get("id")?),
        supplier_id: supplier_id.map(SupplierId),
        name: row.try_get("name")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}
