#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashMap;
use std::sync::Arc;

use lead_bridge_lib::integrations::gateway::{CrmGateway, GatewayError, GatewayResult};
use lead_bridge_lib::integrations::{
    Catalog, CatalogElement, Contact, Customer, CustomFieldDefinition, CustomFieldValues,
    EntityLink, EntityType, Lead, Note, Task, User,
};
use lead_bridge_lib::submission::Submission;
use lead_bridge_lib::workflow::provisioning::{PRODUCT_CATALOG, SEED_PRODUCTS};
use lead_bridge_lib::workflow::{IntegrationWorkflow, WorkflowSettings};

pub const CATALOG_ID: u64 = 500;
pub const OPEN_STATUS_ID: u64 = 1_001;

/// Every mutating gateway call, in the order it reached the CRM.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    CreateField(String),
    CreateCatalogElement(String),
    CreateContact(Contact),
    CreateLead(Lead),
    LinkLead(u64, Vec<EntityLink>),
    CreateCustomer(Customer),
    LinkCustomer(u64, Vec<EntityLink>),
    CreateTask(Task),
    CreateNote(EntityType, Note),
}

#[derive(Default)]
pub struct FakeCrm {
    pub fields: Vec<CustomFieldDefinition>,
    pub catalogs: Vec<Catalog>,
    pub elements: HashMap<u64, Vec<CatalogElement>>,
    pub contacts: Vec<Contact>,
    pub links: HashMap<u64, Vec<EntityLink>>,
    pub leads: HashMap<u64, Lead>,
    pub users: Vec<User>,
    pub calls: Vec<Call>,
    pub fail_on: Option<&'static str>,
    next_id: u64,
}

impl FakeCrm {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        10_000 + self.next_id
    }
}

/// In-memory CRM. Empty listings answer `NoContent` like the real API.
#[derive(Default)]
pub struct FakeGateway {
    pub state: Mutex<FakeCrm>,
}

impl FakeGateway {
    /// An account with users and the product catalog, nothing else.
    pub fn blank() -> Self {
        let gateway = Self::default();
        {
            let mut s = gateway.state.lock();
            s.catalogs.push(Catalog {
                id: CATALOG_ID,
                name: PRODUCT_CATALOG.to_string(),
            });
            s.users = vec![
                User { id: 1, name: "Olga".into() },
                User { id: 2, name: "Pavel".into() },
                User { id: 3, name: "Irina".into() },
            ];
        }
        gateway
    }

    /// A blank account whose fields and seed products already exist.
    pub fn provisioned() -> Self {
        let gateway = Self::blank();
        {
            let mut s = gateway.state.lock();
            s.fields = vec![
                CustomFieldDefinition::numeric("Возраст", "AGE"),
                CustomFieldDefinition::select("Пол", "GENDER", Vec::new()),
            ];
            let elements = SEED_PRODUCTS
                .iter()
                .enumerate()
                .map(|(i, p)| CatalogElement {
                    id: Some(700 + i as u64),
                    ..CatalogElement::priced(p.name, p.price)
                })
                .collect();
            s.elements.insert(CATALOG_ID, elements);
        }
        gateway
    }

    pub fn with_contact(self, id: u64, phone: &str) -> Self {
        self.state.lock().contacts.push(Contact {
            id: Some(id),
            name: Some("Existing Person".into()),
            custom_fields_values: vec![CustomFieldValues::text("PHONE", phone)],
            ..Contact::default()
        });
        self
    }

    pub fn with_lead(self, contact_id: u64, lead_id: u64, status_id: u64) -> Self {
        {
            let mut s = self.state.lock();
            s.leads.insert(
                lead_id,
                Lead {
                    id: Some(lead_id),
                    name: "Old deal".into(),
                    status_id: Some(status_id),
                    ..Lead::default()
                },
            );
            s.links.entry(contact_id).or_default().push(EntityLink {
                to_entity_id: lead_id,
                to_entity_type: EntityType::Leads,
                metadata: None,
            });
        }
        self
    }

    pub fn with_customer_link(self, contact_id: u64, customer_id: u64) -> Self {
        self.state
            .lock()
            .links
            .entry(contact_id)
            .or_default()
            .push(EntityLink {
                to_entity_id: customer_id,
                to_entity_type: EntityType::Customers,
                metadata: None,
            });
        self
    }

    pub fn failing_on(self, method: &'static str) -> Self {
        self.state.lock().fail_on = Some(method);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    fn check(&self, method: &'static str) -> GatewayResult<()> {
        if self.state.lock().fail_on == Some(method) {
            return Err(GatewayError::Api {
                status: 500,
                body: format!("{} failed", method),
            });
        }
        Ok(())
    }
}

fn non_empty<T>(items: Vec<T>) -> GatewayResult<Vec<T>> {
    if items.is_empty() {
        Err(GatewayError::NoContent)
    } else {
        Ok(items)
    }
}

#[async_trait]
impl CrmGateway for FakeGateway {
    async fn list_custom_fields(
        &self,
        _entity: EntityType,
    ) -> GatewayResult<Vec<CustomFieldDefinition>> {
        self.check("list_custom_fields")?;
        let fields = self.state.lock().fields.clone();
        // Suspends like a network call would.
        tokio::task::yield_now().await;
        non_empty(fields)
    }

    async fn create_custom_field(
        &self,
        _entity: EntityType,
        field: &CustomFieldDefinition,
    ) -> GatewayResult<CustomFieldDefinition> {
        self.check("create_custom_field")?;
        let mut s = self.state.lock();
        let mut created = field.clone();
        created.id = Some(s.next_id());
        s.fields.push(created.clone());
        s.calls
            .push(Call::CreateField(field.code.clone().unwrap_or_default()));
        Ok(created)
    }

    async fn list_catalogs(&self) -> GatewayResult<Vec<Catalog>> {
        self.check("list_catalogs")?;
        non_empty(self.state.lock().catalogs.clone())
    }

    async fn list_catalog_elements(&self, catalog_id: u64) -> GatewayResult<Vec<CatalogElement>> {
        self.check("list_catalog_elements")?;
        non_empty(
            self.state
                .lock()
                .elements
                .get(&catalog_id)
                .cloned()
                .unwrap_or_default(),
        )
    }

    async fn create_catalog_elements(
        &self,
        catalog_id: u64,
        elements: &[CatalogElement],
    ) -> GatewayResult<Vec<CatalogElement>> {
        self.check("create_catalog_elements")?;
        let mut s = self.state.lock();
        let mut created = Vec::new();
        for element in elements {
            let mut element = element.clone();
            element.id = Some(s.next_id());
            s.calls.push(Call::CreateCatalogElement(element.name.clone()));
            s.elements.entry(catalog_id).or_default().push(element.clone());
            created.push(element);
        }
        Ok(created)
    }

    async fn list_contacts(&self) -> GatewayResult<Vec<Contact>> {
        self.check("list_contacts")?;
        let contacts = self.state.lock().contacts.clone();
        // Lets a concurrent submission run between the scan and the insert.
        tokio::task::yield_now().await;
        non_empty(contacts)
    }

    async fn create_contact(&self, contact: &Contact) -> GatewayResult<Contact> {
        self.check("create_contact")?;
        let mut s = self.state.lock();
        let mut created = contact.clone();
        created.id = Some(s.next_id());
        s.contacts.push(created.clone());
        s.calls.push(Call::CreateContact(contact.clone()));
        Ok(created)
    }

    async fn get_contact_links(&self, contact_id: u64) -> GatewayResult<Vec<EntityLink>> {
        self.check("get_contact_links")?;
        non_empty(
            self.state
                .lock()
                .links
                .get(&contact_id)
                .cloned()
                .unwrap_or_default(),
        )
    }

    async fn list_leads(&self) -> GatewayResult<Vec<Lead>> {
        self.check("list_leads")?;
        non_empty(self.state.lock().leads.values().cloned().collect())
    }

    async fn get_lead(&self, lead_id: u64) -> GatewayResult<Lead> {
        self.check("get_lead")?;
        self.state
            .lock()
            .leads
            .get(&lead_id)
            .cloned()
            .ok_or(GatewayError::Api {
                status: 404,
                body: "lead not found".into(),
            })
    }

    async fn create_leads(&self, leads: &[Lead]) -> GatewayResult<Vec<Lead>> {
        self.check("create_leads")?;
        let mut s = self.state.lock();
        let mut created = Vec::new();
        for lead in leads {
            let mut lead = lead.clone();
            let id = s.next_id();
            lead.id = Some(id);
            lead.status_id = Some(OPEN_STATUS_ID);
            for contact in &lead.embedded.contacts {
                s.links.entry(contact.id).or_default().push(EntityLink {
                    to_entity_id: id,
                    to_entity_type: EntityType::Leads,
                    metadata: None,
                });
            }
            s.leads.insert(id, lead.clone());
            s.calls.push(Call::CreateLead(lead.clone()));
            created.push(lead);
        }
        Ok(created)
    }

    async fn link_lead(&self, lead_id: u64, links: &[EntityLink]) -> GatewayResult<()> {
        self.check("link_lead")?;
        self.state
            .lock()
            .calls
            .push(Call::LinkLead(lead_id, links.to_vec()));
        Ok(())
    }

    async fn create_customer(&self, customer: &Customer) -> GatewayResult<Customer> {
        self.check("create_customer")?;
        let mut s = self.state.lock();
        let mut created = customer.clone();
        created.id = Some(s.next_id());
        s.calls.push(Call::CreateCustomer(customer.clone()));
        Ok(created)
    }

    async fn link_customer(&self, customer_id: u64, links: &[EntityLink]) -> GatewayResult<()> {
        self.check("link_customer")?;
        self.state
            .lock()
            .calls
            .push(Call::LinkCustomer(customer_id, links.to_vec()));
        Ok(())
    }

    async fn list_users(&self) -> GatewayResult<Vec<User>> {
        self.check("list_users")?;
        non_empty(self.state.lock().users.clone())
    }

    async fn create_tasks(&self, tasks: &[Task]) -> GatewayResult<Vec<Task>> {
        self.check("create_tasks")?;
        let mut s = self.state.lock();
        let mut created = Vec::new();
        for task in tasks {
            let mut task = task.clone();
            task.id = Some(s.next_id());
            s.calls.push(Call::CreateTask(task.clone()));
            created.push(task);
        }
        Ok(created)
    }

    async fn create_notes(&self, entity: EntityType, notes: &[Note]) -> GatewayResult<()> {
        self.check("create_notes")?;
        let mut s = self.state.lock();
        for note in notes {
            s.calls.push(Call::CreateNote(entity, note.clone()));
        }
        Ok(())
    }
}

/// Monday 2024-01-01 17:00 UTC, i.e. 20:00 in Moscow.
pub fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 17, 0, 0).unwrap()
}

pub fn moscow_settings() -> WorkflowSettings {
    lead_bridge_lib::config::AppConfig::default().workflow_settings()
}

pub fn workflow(gateway: Arc<FakeGateway>, seed: u64) -> IntegrationWorkflow {
    IntegrationWorkflow::new(gateway, moscow_settings())
        .with_rng(StdRng::seed_from_u64(seed))
        .with_clock(fixed_now)
}

pub fn submission(phone: &str) -> Submission {
    Submission {
        first_name: "Ivan".into(),
        last_name: "Petrov".into(),
        email: "ivan@example.com".into(),
        phone: phone.into(),
        age: 34,
        gender: 'm',
    }
}
