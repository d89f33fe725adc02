pub mod crm;
pub mod gateway;
pub mod oauth;

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Task type id of a follow-up call in the CRM's default task taxonomy.
pub const TASK_TYPE_FOLLOW_UP: u32 = 1;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Contacts,
    Leads,
    Customers,
    CatalogElements,
    #[serde(other)]
    Other,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Contacts => "contacts",
            EntityType::Leads => "leads",
            EntityType::Customers => "customers",
            EntityType::CatalogElements => "catalog_elements",
            EntityType::Other => "other",
        }
    }
}

/// A single custom field value as the CRM reports it: phones and emails
/// come back as strings, numeric fields usually as integers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ScalarValue {
    Int(i64),
    Text(String),
    Other(serde_json::Value),
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Int(n) => write!(f, "{}", n),
            ScalarValue::Text(s) => f.write_str(s),
            ScalarValue::Other(v) => write!(f, "{}", v),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct FieldValue {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<ScalarValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enum_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enum_code: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CustomFieldValues {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field_code: Option<String>,
    #[serde(default, skip_serializing)]
    pub field_name: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub values: Vec<FieldValue>,
}

impl CustomFieldValues {
    fn by_code(code: &str, values: Vec<FieldValue>) -> Self {
        Self {
            field_id: None,
            field_code: Some(code.to_string()),
            field_name: None,
            values,
        }
    }

    pub fn text(code: &str, value: &str) -> Self {
        Self::by_code(
            code,
            vec![FieldValue {
                value: Some(ScalarValue::Text(value.to_string())),
                ..FieldValue::default()
            }],
        )
    }

    pub fn numeric(code: &str, value: i64) -> Self {
        Self::by_code(
            code,
            vec![FieldValue {
                value: Some(ScalarValue::Int(value)),
                ..FieldValue::default()
            }],
        )
    }

    pub fn select(code: &str, enum_code: &str) -> Self {
        Self::by_code(
            code,
            vec![FieldValue {
                enum_code: Some(enum_code.to_string()),
                ..FieldValue::default()
            }],
        )
    }

    pub fn has_code(&self, code: &str) -> bool {
        self.field_code.as_deref() == Some(code)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,
    Numeric,
    Select,
    Multiselect,
    Multitext,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnumOption {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub value: String,
    #[serde(default)]
    pub sort: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl EnumOption {
    pub fn new(code: &str, value: &str, sort: i32) -> Self {
        Self {
            id: None,
            value: value.to_string(),
            sort,
            code: Some(code.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CustomFieldDefinition {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enums: Option<Vec<EnumOption>>,
}

impl CustomFieldDefinition {
    pub fn numeric(name: &str, code: &str) -> Self {
        Self {
            id: None,
            name: name.to_string(),
            code: Some(code.to_string()),
            field_type: FieldType::Numeric,
            enums: None,
        }
    }

    pub fn select(name: &str, code: &str, options: Vec<EnumOption>) -> Self {
        Self {
            id: None,
            name: name.to_string(),
            code: Some(code.to_string()),
            field_type: FieldType::Select,
            enums: Some(options),
        }
    }

    pub fn has_code(&self, code: &str) -> bool {
        self.code.as_deref() == Some(code)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Catalog {
    pub id: u64,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CatalogElement {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub name: String,
    #[serde(
        default,
        deserialize_with = "null_as_empty",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub custom_fields_values: Vec<CustomFieldValues>,
}

impl CatalogElement {
    pub fn priced(name: &str, price: i64) -> Self {
        Self {
            id: None,
            name: name.to_string(),
            custom_fields_values: vec![CustomFieldValues::numeric("PRICE", price)],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Contact {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(
        default,
        deserialize_with = "null_as_empty",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub custom_fields_values: Vec<CustomFieldValues>,
}

impl Contact {
    pub fn field(&self, code: &str) -> Option<&CustomFieldValues> {
        self.custom_fields_values.iter().find(|f| f.has_code(code))
    }

    /// True when any value of the `PHONE` field equals `phone` exactly.
    pub fn has_phone(&self, phone: &str) -> bool {
        self.field("PHONE").map_or(false, |f| {
            f.values
                .iter()
                .filter_map(|v| v.value.as_ref())
                .any(|v| v.to_string() == phone)
        })
    }

    pub fn display_name(&self) -> String {
        if let Some(name) = self.name.as_deref().filter(|n| !n.trim().is_empty()) {
            return name.to_string();
        }
        [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LeadContact {
    pub id: u64,
    #[serde(default)]
    pub is_main: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct LeadEmbedded {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contacts: Vec<LeadContact>,
}

impl LeadEmbedded {
    fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Lead {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(default)]
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub responsible_user_id: Option<u64>,
    #[serde(
        rename = "_embedded",
        default,
        skip_serializing_if = "LeadEmbedded::is_empty"
    )]
    pub embedded: LeadEmbedded,
}

impl Lead {
    /// A new lead with `contact_id` attached as its main contact.
    pub fn for_contact(
        name: String,
        price: i64,
        responsible_user_id: u64,
        contact_id: u64,
    ) -> Self {
        Self {
            id: None,
            name,
            price: Some(price),
            status_id: None,
            responsible_user_id: Some(responsible_user_id),
            embedded: LeadEmbedded {
                contacts: vec![LeadContact {
                    id: contact_id,
                    is_main: true,
                }],
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Customer {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub name: String,
}

impl Customer {
    pub fn named(name: String) -> Self {
        Self { id: None, name }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: u64,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub task_type_id: u32,
    pub text: String,
    /// Unix timestamp, seconds.
    pub complete_till: i64,
    pub entity_type: EntityType,
    pub entity_id: u64,
    pub responsible_user_id: u64,
}

impl Task {
    pub fn follow_up(
        lead_id: u64,
        responsible_user_id: u64,
        complete_till: i64,
        text: &str,
    ) -> Self {
        Self {
            id: None,
            task_type_id: TASK_TYPE_FOLLOW_UP,
            text: text.to_string(),
            complete_till,
            entity_type: EntityType::Leads,
            entity_id: lead_id,
            responsible_user_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NoteParams {
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Note {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub entity_id: u64,
    pub note_type: String,
    pub params: NoteParams,
}

impl Note {
    pub fn common(entity_id: u64, text: &str) -> Self {
        Self {
            id: None,
            entity_id,
            note_type: "common".to_string(),
            params: NoteParams {
                text: text.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct LinkMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub catalog_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quantity: Option<u32>,
}

/// A directed relation from the entity it is read from (or posted to)
/// towards `to_entity_id`. The same shape is used for listing and linking.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntityLink {
    pub to_entity_id: u64,
    pub to_entity_type: EntityType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<LinkMetadata>,
}

impl EntityLink {
    pub fn to_contact(contact_id: u64) -> Self {
        Self {
            to_entity_id: contact_id,
            to_entity_type: EntityType::Contacts,
            metadata: None,
        }
    }

    pub fn to_catalog_element(catalog_id: u64, element_id: u64, quantity: u32) -> Self {
        Self {
            to_entity_id: element_id,
            to_entity_type: EntityType::CatalogElements,
            metadata: Some(LinkMetadata {
                catalog_id: Some(catalog_id),
                quantity: Some(quantity),
            }),
        }
    }
}

/// The CRM sends `null` instead of `[]` for entities without custom values.
fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn contact_phone_lookup_reads_phone_field_only() {
        let contact: Contact = serde_json::from_value(json!({
            "id": 11,
            "name": "Ivan Petrov",
            "custom_fields_values": [
                { "field_id": 1, "field_code": "EMAIL", "values": [{ "value": "79990001122" }] },
                { "field_id": 2, "field_code": "PHONE", "values": [
                    { "value": "70000000000", "enum_code": "WORK" },
                    { "value": "79991234567", "enum_code": "MOB" }
                ]}
            ]
        }))
        .unwrap();

        assert!(contact.has_phone("79991234567"));
        assert!(!contact.has_phone("79990001122"));
    }

    #[test]
    fn null_custom_fields_deserialize_as_empty() {
        let contact: Contact =
            serde_json::from_value(json!({ "id": 3, "custom_fields_values": null })).unwrap();
        assert!(contact.custom_fields_values.is_empty());
        assert!(!contact.has_phone("1"));
    }

    #[test]
    fn lead_payload_embeds_main_contact() {
        let lead = Lead::for_contact("Deal".to_string(), 120_000, 7, 42);
        let value = serde_json::to_value(&lead).unwrap();
        assert_eq!(
            value,
            json!({
                "name": "Deal",
                "price": 120000,
                "responsible_user_id": 7,
                "_embedded": { "contacts": [{ "id": 42, "is_main": true }] }
            })
        );
    }

    #[test]
    fn unknown_link_types_are_tolerated() {
        let link: EntityLink = serde_json::from_value(json!({
            "to_entity_id": 5,
            "to_entity_type": "talks"
        }))
        .unwrap();
        assert_eq!(link.to_entity_type, EntityType::Other);
    }

    #[test]
    fn display_name_falls_back_to_first_and_last() {
        let contact = Contact {
            first_name: Some("Anna".into()),
            last_name: Some("Smirnova".into()),
            ..Contact::default()
        };
        assert_eq!(contact.display_name(), "Anna Smirnova");
    }
}
