//! Account bootstrap: the contact custom fields and the seed products the
//! intake relies on. Every step checks before it creates, so running it on
//! an already provisioned account is a read-only no-op.

use crate::integrations::gateway::{CrmGateway, GatewayResult, OrEmpty};
use crate::integrations::{CatalogElement, CustomFieldDefinition, EntityType, EnumOption};

use super::WorkflowError;

pub const PRODUCT_CATALOG: &str = "Товары";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeedProduct {
    pub name: &'static str,
    pub price: i64,
}

pub const SEED_PRODUCTS: [SeedProduct; 2] = [
    SeedProduct {
        name: "Товар1",
        price: 10_000,
    },
    SeedProduct {
        name: "Товар2",
        price: 25_000,
    },
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedProduct {
    pub id: u64,
    pub name: String,
}

/// The product catalog with the seed products in [`SEED_PRODUCTS`] order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedCatalog {
    pub catalog_id: u64,
    pub products: Vec<ProvisionedProduct>,
}

fn age_field() -> CustomFieldDefinition {
    CustomFieldDefinition::numeric("Возраст", "AGE")
}

fn gender_field() -> CustomFieldDefinition {
    // Both options carry sort rank 1, as on accounts provisioned so far.
    CustomFieldDefinition::select(
        "Пол",
        "GENDER",
        vec![
            EnumOption::new("M", "Мужской", 1),
            EnumOption::new("F", "Женский", 1),
        ],
    )
}

/// Creates the `AGE` and `GENDER` contact fields when the account lacks them.
pub async fn ensure_contact_fields(gateway: &dyn CrmGateway) -> GatewayResult<()> {
    let existing = gateway
        .list_custom_fields(EntityType::Contacts)
        .await
        .or_empty()?;

    for field in [age_field(), gender_field()] {
        let code = field.code.clone().unwrap_or_default();
        if existing.iter().any(|f| f.has_code(&code)) {
            continue;
        }
        let created = gateway
            .create_custom_field(EntityType::Contacts, &field)
            .await?;
        log::info!("Created contact field {} (id {:?})", code, created.id);
    }
    Ok(())
}

/// Makes sure every seed product exists in the product catalog.
pub async fn ensure_seed_products(
    gateway: &dyn CrmGateway,
) -> Result<ProvisionedCatalog, WorkflowError> {
    let catalog = gateway
        .list_catalogs()
        .await
        .or_empty()?
        .into_iter()
        .find(|c| c.name == PRODUCT_CATALOG)
        .ok_or_else(|| WorkflowError::CatalogNotFound(PRODUCT_CATALOG.to_string()))?;

    let elements = gateway
        .list_catalog_elements(catalog.id)
        .await
        .or_empty()?;

    let mut products = Vec::with_capacity(SEED_PRODUCTS.len());
    for seed in SEED_PRODUCTS {
        let existing = elements
            .iter()
            .find(|e| e.name == seed.name)
            .and_then(|e| e.id);

        let id = match existing {
            Some(id) => id,
            None => {
                let element = CatalogElement::priced(seed.name, seed.price);
                let created = gateway
                    .create_catalog_elements(catalog.id, &[element])
                    .await?;
                let id = created
                    .first()
                    .and_then(|e| e.id)
                    .ok_or(WorkflowError::EmptyCreateResponse("catalog element"))?;
                log::info!("Created product {} (id {}) in catalog {}", seed.name, id, catalog.id);
                id
            }
        };

        products.push(ProvisionedProduct {
            id,
            name: seed.name.to_string(),
        });
    }

    Ok(ProvisionedCatalog {
        catalog_id: catalog.id,
        products,
    })
}
