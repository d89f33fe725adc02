use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::gateway::{CrmGateway, GatewayError, GatewayResult};
use super::oauth::Credentials;
use super::{
    Catalog, CatalogElement, Contact, Customer, CustomFieldDefinition, EntityLink, EntityType,
    Lead, Note, Task, User,
};

const PAGE_LIMIT: u32 = 250;

// ─── Wire envelopes ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct Page {
    #[serde(rename = "_embedded", default)]
    embedded: serde_json::Map<String, serde_json::Value>,
    #[serde(rename = "_links", default)]
    links: PageLinks,
}

#[derive(Debug, Default, Deserialize)]
struct PageLinks {
    next: Option<Href>,
}

#[derive(Debug, Deserialize)]
struct Href {
    href: String,
}

#[derive(Debug, Deserialize)]
struct CreatedId {
    id: u64,
}

/// amoCRM API v4 over HTTPS, authorised with the shared [`Credentials`].
pub struct AmoCrmClient {
    http: Client,
    credentials: Arc<Credentials>,
    base_url: Option<String>,
}

impl AmoCrmClient {
    pub fn new(credentials: Arc<Credentials>) -> Self {
        Self {
            http: Client::new(),
            credentials,
            base_url: None,
        }
    }

    /// Pins the API origin instead of deriving it from the token's account domain.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into().trim_end_matches('/').to_string());
        self
    }

    async fn request(&self, method: Method, path_or_url: &str) -> GatewayResult<RequestBuilder> {
        let token = self.credentials.bearer().await?;
        let url = if path_or_url.starts_with("http://") || path_or_url.starts_with("https://") {
            path_or_url.to_string()
        } else {
            let origin = self
                .base_url
                .clone()
                .unwrap_or_else(|| format!("https://{}", token.base_domain));
            format!("{}{}", origin, path_or_url)
        };

        Ok(self
            .http
            .request(method, url)
            .header("Authorization", format!("Bearer {}", token.access_token)))
    }

    async fn send(builder: RequestBuilder) -> GatewayResult<Response> {
        let response = builder.send().await?;

        let status = response.status();
        if status == StatusCode::NO_CONTENT {
            return Err(GatewayError::NoContent);
        }
        if status == StatusCode::UNAUTHORIZED {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Unauthorized(body));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn get_json<T: DeserializeOwned>(&self, path_or_url: &str) -> GatewayResult<T> {
        let response = Self::send(self.request(Method::GET, path_or_url).await?).await?;
        response
            .json()
            .await
            .map_err(|e| GatewayError::Decode(format!("{}: {}", path_or_url, e)))
    }

    /// Walks `_links.next` until exhausted. An empty first page is `NoContent`.
    async fn list_all<T: DeserializeOwned>(&self, path: &str, key: &str) -> GatewayResult<Vec<T>> {
        let mut next = Some(format!("{}?limit={}", path, PAGE_LIMIT));
        let mut items = Vec::new();

        while let Some(url) = next.take() {
            let page: Page = match self.get_json(&url).await {
                Ok(page) => page,
                Err(GatewayError::NoContent) if !items.is_empty() => break,
                Err(e) => return Err(e),
            };

            if let Some(values) = page.embedded.get(key) {
                let batch: Vec<T> = serde_json::from_value(values.clone())
                    .map_err(|e| GatewayError::Decode(format!("{} {}: {}", path, key, e)))?;
                items.extend(batch);
            }
            next = page.links.next.map(|h| h.href);
        }

        Ok(items)
    }

    /// POSTs `items` as a batch and returns the ids the CRM assigned, in order.
    async fn create_batch<B: Serialize + ?Sized>(
        &self,
        path: &str,
        key: &str,
        items: &B,
    ) -> GatewayResult<Vec<u64>> {
        let builder = self.request(Method::POST, path).await?.json(items);
        let page: Page = Self::send(builder)
            .await?
            .json()
            .await
            .map_err(|e| GatewayError::Decode(format!("{}: {}", path, e)))?;

        let created: Vec<CreatedId> = match page.embedded.get(key) {
            Some(values) => serde_json::from_value(values.clone())
                .map_err(|e| GatewayError::Decode(format!("{} {}: {}", path, key, e)))?,
            None => Vec::new(),
        };
        Ok(created.into_iter().map(|c| c.id).collect())
    }

    async fn post_links(&self, path: &str, links: &[EntityLink]) -> GatewayResult<()> {
        let builder = self.request(Method::POST, path).await?.json(links);
        Self::send(builder).await?;
        Ok(())
    }
}

fn assign_ids<T: Clone>(items: &[T], ids: Vec<u64>, set: impl Fn(&mut T, u64)) -> Vec<T> {
    items
        .iter()
        .zip(ids)
        .map(|(item, id)| {
            let mut item = item.clone();
            set(&mut item, id);
            item
        })
        .collect()
}

fn first_created<T>(mut created: Vec<T>, what: &str) -> GatewayResult<T> {
    if created.is_empty() {
        return Err(GatewayError::Decode(format!("no {} in create response", what)));
    }
    Ok(created.swap_remove(0))
}

#[async_trait]
impl CrmGateway for AmoCrmClient {
    async fn list_custom_fields(
        &self,
        entity: EntityType,
    ) -> GatewayResult<Vec<CustomFieldDefinition>> {
        let path = format!("/api/v4/{}/custom_fields", entity.as_str());
        self.list_all(&path, "custom_fields").await
    }

    async fn create_custom_field(
        &self,
        entity: EntityType,
        field: &CustomFieldDefinition,
    ) -> GatewayResult<CustomFieldDefinition> {
        let path = format!("/api/v4/{}/custom_fields", entity.as_str());
        let ids = self
            .create_batch(&path, "custom_fields", std::slice::from_ref(field))
            .await?;
        let created = assign_ids(std::slice::from_ref(field), ids, |f, id| f.id = Some(id));
        first_created(created, "custom field")
    }

    async fn list_catalogs(&self) -> GatewayResult<Vec<Catalog>> {
        self.list_all("/api/v4/catalogs", "catalogs").await
    }

    async fn list_catalog_elements(&self, catalog_id: u64) -> GatewayResult<Vec<CatalogElement>> {
        self.list_all(&format!("/api/v4/catalogs/{}/elements", catalog_id), "elements")
            .await
    }

    async fn create_catalog_elements(
        &self,
        catalog_id: u64,
        elements: &[CatalogElement],
    ) -> GatewayResult<Vec<CatalogElement>> {
        let path = format!("/api/v4/catalogs/{}/elements", catalog_id);
        let ids = self.create_batch(&path, "elements", elements).await?;
        Ok(assign_ids(elements, ids, |e, id| e.id = Some(id)))
    }

    async fn list_contacts(&self) -> GatewayResult<Vec<Contact>> {
        self.list_all("/api/v4/contacts", "contacts").await
    }

    async fn create_contact(&self, contact: &Contact) -> GatewayResult<Contact> {
        let ids = self
            .create_batch("/api/v4/contacts", "contacts", std::slice::from_ref(contact))
            .await?;
        let created = assign_ids(std::slice::from_ref(contact), ids, |c, id| c.id = Some(id));
        first_created(created, "contact")
    }

    async fn get_contact_links(&self, contact_id: u64) -> GatewayResult<Vec<EntityLink>> {
        self.list_all(&format!("/api/v4/contacts/{}/links", contact_id), "links")
            .await
    }

    async fn list_leads(&self) -> GatewayResult<Vec<Lead>> {
        self.list_all("/api/v4/leads", "leads").await
    }

    async fn get_lead(&self, lead_id: u64) -> GatewayResult<Lead> {
        self.get_json(&format!("/api/v4/leads/{}", lead_id)).await
    }

    async fn create_leads(&self, leads: &[Lead]) -> GatewayResult<Vec<Lead>> {
        let ids = self.create_batch("/api/v4/leads", "leads", leads).await?;
        Ok(assign_ids(leads, ids, |l, id| l.id = Some(id)))
    }

    async fn link_lead(&self, lead_id: u64, links: &[EntityLink]) -> GatewayResult<()> {
        self.post_links(&format!("/api/v4/leads/{}/link", lead_id), links)
            .await
    }

    async fn create_customer(&self, customer: &Customer) -> GatewayResult<Customer> {
        let ids = self
            .create_batch("/api/v4/customers", "customers", std::slice::from_ref(customer))
            .await?;
        let created = assign_ids(std::slice::from_ref(customer), ids, |c, id| c.id = Some(id));
        first_created(created, "customer")
    }

    async fn link_customer(&self, customer_id: u64, links: &[EntityLink]) -> GatewayResult<()> {
        self.post_links(&format!("/api/v4/customers/{}/link", customer_id), links)
            .await
    }

    async fn list_users(&self) -> GatewayResult<Vec<User>> {
        self.list_all("/api/v4/users", "users").await
    }

    async fn create_tasks(&self, tasks: &[Task]) -> GatewayResult<Vec<Task>> {
        let ids = self.create_batch("/api/v4/tasks", "tasks", tasks).await?;
        Ok(assign_ids(tasks, ids, |t, id| t.id = Some(id)))
    }

    async fn create_notes(&self, entity: EntityType, notes: &[Note]) -> GatewayResult<()> {
        let path = format!("/api/v4/{}/notes", entity.as_str());
        self.create_batch(&path, "notes", notes).await?;
        Ok(())
    }
}
