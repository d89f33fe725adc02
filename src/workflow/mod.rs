pub mod phone_lock;
pub mod provisioning;
pub mod schedule;

use chrono::{DateTime, FixedOffset, Utc};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::ops::RangeInclusive;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::OnceCell;

use crate::integrations::gateway::{CrmGateway, GatewayError, OrEmpty};
use crate::integrations::{
    Contact, Customer, CustomFieldValues, EntityLink, EntityType, Lead, Note, Task,
};
use crate::submission::Submission;
use phone_lock::PhoneLocks;
use provisioning::ProvisionedCatalog;
use schedule::FollowUpPolicy;

/// Pipeline status the CRM uses for won leads.
pub const WON_STATUS_ID: u64 = 142;

pub const EXISTING_CONTACT_NOTE: &str = "Контакт уже существует";
pub const FOLLOW_UP_TEXT: &str = "Новая задача";

const LEAD_PRICE: RangeInclusive<i64> = 100_000..=150_000;
const PRODUCT_QUANTITY: RangeInclusive<u32> = 1..=5;

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error("catalog {0:?} not found")]
    CatalogNotFound(String),
    #[error("the account has no users to assign the lead to")]
    NoUsers,
    #[error("CRM did not return the created {0}")]
    EmptyCreateResponse(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    ContactAndLeadCreated { contact_id: u64, lead_id: u64 },
    CustomerCreated { customer_id: u64 },
    CustomerAlreadyExists,
    LeadInProgress { lead_id: u64 },
}

impl Outcome {
    pub fn message(&self) -> &'static str {
        match self {
            Outcome::ContactAndLeadCreated { .. } => "Contact and Lead are created",
            Outcome::CustomerCreated { .. } => "Customer created",
            Outcome::CustomerAlreadyExists => "Customer already exists",
            Outcome::LeadInProgress { .. } => "Lead is in progress",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowSettings {
    /// Wall clock of the sales team.
    pub utc_offset: FixedOffset,
    pub follow_up: FollowUpPolicy,
}

type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// What the duplicate check decided about a matching contact.
enum Resolution {
    Finished(Outcome),
    Reuse(Contact),
}

/// Turns one validated submission into CRM records.
///
/// Remote calls run strictly in sequence and the first failure aborts the
/// submission; records created before the failure are left in place.
///
/// Account provisioning succeeds at most once per workflow instance.
/// Concurrent first submissions wait for the one that runs it, and a
/// failed attempt is retried by the next submission.
pub struct IntegrationWorkflow {
    gateway: Arc<dyn CrmGateway>,
    settings: WorkflowSettings,
    provisioned: OnceCell<ProvisionedCatalog>,
    rng: Mutex<StdRng>,
    clock: Clock,
    phone_locks: PhoneLocks,
}

impl IntegrationWorkflow {
    pub fn new(gateway: Arc<dyn CrmGateway>, settings: WorkflowSettings) -> Self {
        Self {
            gateway,
            settings,
            provisioned: OnceCell::new(),
            rng: Mutex::new(StdRng::from_entropy()),
            clock: Arc::new(Utc::now),
            phone_locks: PhoneLocks::new(),
        }
    }

    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = Mutex::new(rng);
        self
    }

    pub fn with_clock(
        mut self,
        clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static,
    ) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub async fn process_submission(
        &self,
        submission: &Submission,
    ) -> Result<Outcome, WorkflowError> {
        let catalog = self.provisioned_catalog().await?;

        // Held until the lead exists so a concurrent submission with the
        // same phone sees the contact this one creates.
        let _phone_guard = self.phone_locks.lock(&submission.phone).await;

        let contact = match self.find_contact_by_phone(&submission.phone).await? {
            Some(existing) => match self.resolve_existing(existing).await? {
                Resolution::Finished(outcome) => return Ok(outcome),
                Resolution::Reuse(contact) => contact,
            },
            None => self.create_contact(submission).await?,
        };

        self.create_lead_bundle(submission, &contact, catalog).await
    }

    async fn provisioned_catalog(&self) -> Result<&ProvisionedCatalog, WorkflowError> {
        self.provisioned
            .get_or_try_init(|| async {
                let gateway = self.gateway.as_ref();
                log::debug!("Provisioning contact fields");
                provisioning::ensure_contact_fields(gateway).await?;
                log::debug!("Provisioning seed products");
                provisioning::ensure_seed_products(gateway).await
            })
            .await
    }

    async fn find_contact_by_phone(&self, phone: &str) -> Result<Option<Contact>, WorkflowError> {
        let contacts = self.gateway.list_contacts().await.or_empty()?;
        log::debug!("Scanning {} contacts for a duplicate phone", contacts.len());
        Ok(contacts.into_iter().find(|c| c.has_phone(phone)))
    }

    async fn resolve_existing(&self, contact: Contact) -> Result<Resolution, WorkflowError> {
        let contact_id = contact
            .id
            .ok_or_else(|| GatewayError::Decode("listed contact without id".to_string()))?;

        let links = self.gateway.get_contact_links(contact_id).await.or_empty()?;
        let Some(lead_link) = links.iter().find(|l| l.to_entity_type == EntityType::Leads) else {
            log::info!("Contact {} has no lead, reusing it", contact_id);
            return Ok(Resolution::Reuse(contact));
        };

        let lead_id = lead_link.to_entity_id;
        let lead = self.gateway.get_lead(lead_id).await?;

        if lead.status_id != Some(WON_STATUS_ID) {
            self.gateway
                .create_notes(EntityType::Leads, &[Note::common(lead_id, EXISTING_CONTACT_NOTE)])
                .await?;
            log::info!("Lead {} of contact {} is still open, note added", lead_id, contact_id);
            return Ok(Resolution::Finished(Outcome::LeadInProgress { lead_id }));
        }

        if links.iter().any(|l| l.to_entity_type == EntityType::Customers) {
            log::info!("Contact {} already has a customer", contact_id);
            return Ok(Resolution::Finished(Outcome::CustomerAlreadyExists));
        }

        let customer = self
            .gateway
            .create_customer(&Customer::named(contact.display_name()))
            .await?;
        let customer_id = customer
            .id
            .ok_or(WorkflowError::EmptyCreateResponse("customer"))?;
        self.gateway
            .link_customer(customer_id, &[EntityLink::to_contact(contact_id)])
            .await?;
        log::info!("Created customer {} for contact {}", customer_id, contact_id);

        Ok(Resolution::Finished(Outcome::CustomerCreated { customer_id }))
    }

    async fn create_contact(&self, submission: &Submission) -> Result<Contact, WorkflowError> {
        let contact = Contact {
            first_name: Some(submission.first_name.clone()),
            last_name: Some(submission.last_name.clone()),
            custom_fields_values: vec![
                CustomFieldValues::text("PHONE", &submission.phone),
                CustomFieldValues::text("EMAIL", &submission.email),
                CustomFieldValues::numeric("AGE", i64::from(submission.age)),
                CustomFieldValues::select("GENDER", &submission.gender_code()),
            ],
            ..Contact::default()
        };

        let created = self.gateway.create_contact(&contact).await?;
        log::info!("Created contact {:?}", created.id);
        Ok(created)
    }

    async fn create_lead_bundle(
        &self,
        submission: &Submission,
        contact: &Contact,
        catalog: &ProvisionedCatalog,
    ) -> Result<Outcome, WorkflowError> {
        let contact_id = contact
            .id
            .ok_or(WorkflowError::EmptyCreateResponse("contact"))?;

        let users = self.gateway.list_users().await.or_empty()?;
        if users.is_empty() {
            return Err(WorkflowError::NoUsers);
        }

        let (responsible, price, quantities) = {
            let mut rng = self.rng.lock();
            let responsible = users[rng.gen_range(0..users.len())].id;
            let price = rng.gen_range(LEAD_PRICE);
            let quantities: Vec<u32> = catalog
                .products
                .iter()
                .map(|_| rng.gen_range(PRODUCT_QUANTITY))
                .collect();
            (responsible, price, quantities)
        };

        let lead = Lead::for_contact(
            format!("Сделка c {} {}", submission.first_name, submission.last_name),
            price,
            responsible,
            contact_id,
        );
        let lead_id = self
            .gateway
            .create_leads(&[lead])
            .await?
            .first()
            .and_then(|l| l.id)
            .ok_or(WorkflowError::EmptyCreateResponse("lead"))?;
        log::info!("Created lead {} for contact {} (user {})", lead_id, contact_id, responsible);

        let now = (self.clock)().with_timezone(&self.settings.utc_offset);
        let due = schedule::follow_up_due(now, &self.settings.follow_up);
        self.gateway
            .create_tasks(&[Task::follow_up(lead_id, responsible, due.timestamp(), FOLLOW_UP_TEXT)])
            .await?;
        log::info!("Scheduled follow-up for lead {} at {}", lead_id, due.to_rfc3339());

        let links: Vec<EntityLink> = catalog
            .products
            .iter()
            .zip(quantities)
            .map(|(product, quantity)| {
                EntityLink::to_catalog_element(catalog.catalog_id, product.id, quantity)
            })
            .collect();
        self.gateway.link_lead(lead_id, &links).await?;

        Ok(Outcome::ContactAndLeadCreated {
            contact_id,
            lead_id,
        })
    }
}
