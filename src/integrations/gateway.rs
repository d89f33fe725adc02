use async_trait::async_trait;
use thiserror::Error;

use super::{
    Catalog, CatalogElement, Contact, Customer, CustomFieldDefinition, EntityLink, EntityType,
    Lead, Note, Task, User,
};

#[derive(Debug, Error)]
pub enum GatewayError {
    /// The CRM answered 204: the requested collection is empty.
    #[error("CRM returned no content")]
    NoContent,
    #[error("CRM authorization failed: {0}")]
    Unauthorized(String),
    #[error("CRM request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("CRM API error ({status}): {body}")]
    Api { status: u16, body: String },
    #[error("unexpected CRM payload: {0}")]
    Decode(String),
}

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Folds the CRM's "no content" signal into an empty collection.
pub trait OrEmpty<T> {
    fn or_empty(self) -> GatewayResult<Vec<T>>;
}

impl<T> OrEmpty<T> for GatewayResult<Vec<T>> {
    fn or_empty(self) -> GatewayResult<Vec<T>> {
        match self {
            Err(GatewayError::NoContent) => Ok(Vec::new()),
            other => other,
        }
    }
}

/// The slice of the CRM the intake workflow talks to.
///
/// List operations may fail with [`GatewayError::NoContent`] when the
/// collection is empty; callers decide whether that is an error.
#[async_trait]
pub trait CrmGateway: Send + Sync {
    async fn list_custom_fields(
        &self,
        entity: EntityType,
    ) -> GatewayResult<Vec<CustomFieldDefinition>>;

    async fn create_custom_field(
        &self,
        entity: EntityType,
        field: &CustomFieldDefinition,
    ) -> GatewayResult<CustomFieldDefinition>;

    async fn list_catalogs(&self) -> GatewayResult<Vec<Catalog>>;

    async fn list_catalog_elements(&self, catalog_id: u64) -> GatewayResult<Vec<CatalogElement>>;

    async fn create_catalog_elements(
        &self,
        catalog_id: u64,
        elements: &[CatalogElement],
    ) -> GatewayResult<Vec<CatalogElement>>;

    async fn list_contacts(&self) -> GatewayResult<Vec<Contact>>;

    async fn create_contact(&self, contact: &Contact) -> GatewayResult<Contact>;

    async fn get_contact_links(&self, contact_id: u64) -> GatewayResult<Vec<EntityLink>>;

    async fn list_leads(&self) -> GatewayResult<Vec<Lead>>;

    async fn get_lead(&self, lead_id: u64) -> GatewayResult<Lead>;

    async fn create_leads(&self, leads: &[Lead]) -> GatewayResult<Vec<Lead>>;

    async fn link_lead(&self, lead_id: u64, links: &[EntityLink]) -> GatewayResult<()>;

    async fn create_customer(&self, customer: &Customer) -> GatewayResult<Customer>;

    async fn link_customer(&self, customer_id: u64, links: &[EntityLink]) -> GatewayResult<()>;

    async fn list_users(&self) -> GatewayResult<Vec<User>>;

    async fn create_tasks(&self, tasks: &[Task]) -> GatewayResult<Vec<Task>>;

    async fn create_notes(&self, entity: EntityType, notes: &[Note]) -> GatewayResult<()>;
}
