use procura_core::chrono::Utc;
use procura_core::domain::product::{Product, ProductId};
use procura_core::domain::supplier::{Supplier, SupplierId};
use procura_db::{
    DbPool, ProductRepository, RepositoryError, SqlCatalogRepository, SupplierRepository,
};

use crate::commands::{with_migrated_pool, CommandResult};

pub struct DemoSupplier {
    pub id: &'static str,
    pub name: &'static str,
    pub email: &'static str,
    pub description: &'static str,
}

pub struct DemoProduct {
    pub id: &'static str,
    pub supplier_id: &'static str,
    pub name: &'static str,
}

pub const DEMO_SUPPLIERS: &[DemoSupplier] = &[
    DemoSupplier {
        id: "5d0c2f6e-1a3b-4c7d-9e01-000000000001",
        name: "Nordic Parts AB",
        email: "sales@nordicparts.example",
        description: "Authorised distributor for Nordic Semiconductor SoCs in the Nordics",
    },
    DemoSupplier {
        id: "5d0c2f6e-1a3b-4c7d-9e01-000000000002",
        name: "Delta Components",
        email: "quotes@deltacomponents.example",
        description: "Broadline electronics distributor with EU warehousing",
    },
    DemoSupplier {
        id: "5d0c2f6e-1a3b-4c7d-9e01-000000000003",
        name: "Shenzhen Bright Electronics",
        email: "bd@brightelec.example",
        description: "Volume supplier of wireless modules and microcontrollers",
    },
    DemoSupplier {
        id: "5d0c2f6e-1a3b-4c7d-9e01-000000000004",
        name: "Alpine Microsystems",
        email: "procurement@alpinemicro.example",
        description: "Specialist reseller of low-power MCUs with engineering support",
    },
];

pub const DEMO_PRODUCTS: &[DemoProduct] = &[
    DemoProduct {
        id: "8b4e9a10-2c5d-4f6e-8a02-000000000001",
        supplier_id: "5d0c2f6e-1a3b-4c7d-9e01-000000000001",
        name: "nRF54L15",
    },
    DemoProduct {
        id: "8b4e9a10-2c5d-4f6e-8a02-000000000002",
        supplier_id: "5d0c2f6e-1a3b-4c7d-9e01-000000000001",
        name: "nRF52840",
    },
    DemoProduct {
        id: "8b4e9a10-2c5d-4f6e-8a02-000000000003",
        supplier_id: "5d0c2f6e-1a3b-4c7d-9e01-000000000002",
        name: "STM32WB55",
    },
    DemoProduct {
        id: "8b4e9a10-2c5d-4f6e-8a02-000000000004",
        supplier_id: "5d0c2f6e-1a3b-4c7d-9e01-000000000003",
        name: "ESP32-C6",
    },
    DemoProduct {
        id: "8b4e9a10-2c5d-4f6e-8a02-000000000005",
        supplier_id: "5d0c2f6e-1a3b-4c7d-9e01-000000000004",
        name: "MSP430FR2433",
    },
];

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub suppliers_created: usize,
    pub products_created: usize,
}

/// Inserts the demo catalog rows that are missing. Existing rows, including supplier insights
/// learned from past negotiations, are left untouched.
pub async fn load_demo_catalog(pool: &DbPool) -> Result<SeedReport, RepositoryError> {
    let catalog = SqlCatalogRepository::new(pool.clone());
    let mut report = SeedReport::default();

    for demo in DEMO_SUPPLIERS {
        let id = SupplierId(demo.id.to_string());
        if catalog.find_supplier(&id).await?.is_some() {
            continue;
        }
        catalog
            .save_supplier(Supplier {
                id,
                name: demo.name.to_string(),
                email: Some(demo.email.to_string()),
                description: demo.description.to_string(),
                insights: None,
                image_url: None,
                created_at: Utc::now(),
            })
            .await?;
        report.suppliers_created += 1;
    }

    for demo in DEMO_PRODUCTS {
        let id = ProductId(demo.id.to_string());
        if catalog.find_product(&id).await?.is_some() {
            continue;
        }
        catalog
            .save_product(Product {
                id,
                supplier_id: Some(SupplierId(demo.supplier_id.to_string())),
                name: demo.name.to_string(),
                created_at: Utc::now(),
            })
            .await?;
        report.products_created += 1;
    }

    Ok(report)
}

pub fn run() -> CommandResult {
    let result = with_migrated_pool("seed", |_config, pool| async move {
        load_demo_catalog(&pool).await.map_err(|error| ("seed_execution", error.to_string(), 5u8))
    });

    match result {
        Ok(report) => CommandResult::success("seed", render_message(report)),
        Err(failure) => failure,
    }
}

fn render_message(report: SeedReport) -> String {
    let suppliers =
        DEMO_SUPPLIERS.iter().map(|supplier| format!("  - supplier: {}", supplier.name));
    let products = DEMO_PRODUCTS.iter().map(|product| format!("  - product: {}", product.name));
    let lines: Vec<String> = suppliers.chain(products).collect();

    format!(
        "demo catalog ready ({} suppliers and {} products created):\n{}",
        report.suppliers_created,
        report.products_created,
        lines.join("\n")
    )
}

#[cfg(test)]
mod tests {
    use procura_db::{connect_with_settings, migrations, SqlCatalogRepository, SupplierRepository};

    use super::{load_demo_catalog, render_message, SeedReport, DEMO_PRODUCTS, DEMO_SUPPLIERS};

    #[tokio::test]
    async fn demo_catalog_loads_once_and_keeps_learned_insights() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("pool");
        migrations::run_pending(&pool).await.expect("migrations");

        let first = load_demo_catalog(&pool).await.expect("first seed");
        assert_eq!(
            first,
            SeedReport {
                suppliers_created: DEMO_SUPPLIERS.len(),
                products_created: DEMO_PRODUCTS.len()
            }
        );

        let catalog = SqlCatalogRepository::new(pool.clone());
        let nordic = procura_core::domain::supplier::SupplierId(DEMO_SUPPLIERS[0].id.to_string());
        catalog.update_insights(&nordic, "accepted 2.35 USD").await.expect("insights");

        let second = load_demo_catalog(&pool).await.expect("second seed");
        assert_eq!(second, SeedReport::default());

        let supplier = catalog.find_supplier(&nordic).await.expect("find").expect("present");
        assert_eq!(supplier.insights.as_deref(), Some("accepted 2.35 USD"));
    }

    #[test]
    fn catalog_message_lists_every_demo_row() {
        let message = render_message(SeedReport { suppliers_created: 4, products_created: 5 });
        assert!(message.starts_with("demo catalog ready (4 suppliers and 5 products created):"));
        assert!(message.contains("  - product: nRF54L15"));
        assert!(message.contains("  - supplier: Nordic Parts AB"));
    }
}
