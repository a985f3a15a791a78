use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Contact,
    Deal,
    Task,
    Campaign,
}

impl EntityKind {
    pub const ALL: [EntityKind; 4] = [
        EntityKind::Contact,
        EntityKind::Deal,
        EntityKind::Task,
        EntityKind::Campaign,
    ];

    /// REST collection segment, e.g. `/contacts`.
    pub fn collection(self) -> &'static str {
        match self {
            EntityKind::Contact => "contacts",
            EntityKind::Deal => "deals",
            EntityKind::Task => "tasks",
            EntityKind::Campaign => "campaigns",
        }
    }

    pub fn from_collection(segment: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.collection() == segment)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Contact => "contact",
            EntityKind::Deal => "deal",
            EntityKind::Task => "task",
            EntityKind::Campaign => "campaign",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A backend-owned record. `createdAt`/`updatedAt` are only ever set by the
/// backend; the client reads them but never writes them.
pub trait Record: Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static {
    const KIND: EntityKind;

    fn id(&self) -> &str;

    fn owner_id(&self) -> &str;

    fn tags(&self) -> Option<&[String]> {
        None
    }

    fn tags_mut(&mut self) -> Option<&mut Vec<String>> {
        None
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: String,
    pub org_id: String,
    pub owner_id: String,
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default = "default_contact_status")]
    pub status: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Contact {
    pub fn display_name(&self) -> String {
        let full = format!("{} {}", self.first_name, self.last_name);
        full.trim().to_string()
    }
}

pub(crate) fn default_contact_status() -> String {
    "lead".into()
}

impl Record for Contact {
    const KIND: EntityKind = EntityKind::Contact;

    fn id(&self) -> &str {
        &self.id
    }

    fn owner_id(&self) -> &str {
        &self.owner_id
    }

    fn tags(&self) -> Option<&[String]> {
        Some(&self.tags)
    }

    fn tags_mut(&mut self) -> Option<&mut Vec<String>> {
        Some(&mut self.tags)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deal {
    pub id: String,
    pub org_id: String,
    pub owner_id: String,
    pub title: String,
    #[serde(default)]
    pub value: f64,
    pub stage: String,
    #[serde(default)]
    pub contact_id: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub last_activity_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Record for Deal {
    const KIND: EntityKind = EntityKind::Deal;

    fn id(&self) -> &str {
        &self.id
    }

    fn owner_id(&self) -> &str {
        &self.owner_id
    }

    fn tags(&self) -> Option<&[String]> {
        Some(&self.tags)
    }

    fn tags_mut(&mut self) -> Option<&mut Vec<String>> {
        Some(&mut self.tags)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub org_id: String,
    pub owner_id: String,
    pub title: String,
    #[serde(default)]
    pub due_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub contact_id: Option<String>,
    #[serde(default)]
    pub deal_id: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Record for Task {
    const KIND: EntityKind = EntityKind::Task;

    fn id(&self) -> &str {
        &self.id
    }

    fn owner_id(&self) -> &str {
        &self.owner_id
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Email,
    Sms,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    #[default]
    Draft,
    Scheduled,
    Sending,
    Sent,
    Paused,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Campaign {
    pub id: String,
    pub org_id: String,
    pub owner_id: String,
    pub name: String,
    pub channel: Channel,
    #[serde(default)]
    pub status: CampaignStatus,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Record for Campaign {
    const KIND: EntityKind = EntityKind::Campaign;

    fn id(&self) -> &str {
        &self.id
    }

    fn owner_id(&self) -> &str {
        &self.owner_id
    }

    fn tags(&self) -> Option<&[String]> {
        Some(&self.tags)
    }

    fn tags_mut(&mut self) -> Option<&mut Vec<String>> {
        Some(&mut self.tags)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Organization {
    pub id: String,
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collection_names_round_trip() {
        for kind in EntityKind::ALL {
            assert_eq!(EntityKind::from_collection(kind.collection()), Some(kind));
        }
        assert_eq!(EntityKind::from_collection("invoices"), None);
    }

    #[test]
    fn contact_reads_camel_case_wire_format() {
        let raw = serde_json::json!({
            "id": "c-1",
            "orgId": "org-1",
            "ownerId": "u-1",
            "firstName": "Ada",
            "lastName": "Lovelace",
            "email": "ada@example.com",
            "tags": ["vip"],
            "createdAt": "2024-03-01T10:00:00Z"
        });
        let contact: Contact = serde_json::from_value(raw).expect("contact");
        assert_eq!(contact.status, "lead");
        assert_eq!(contact.display_name(), "Ada Lovelace");
        assert_eq!(contact.tags(), Some(&["vip".to_string()][..]));
        assert!(contact.updated_at.is_none());
    }

    #[test]
    fn tasks_have_no_tags() {
        let task = Task {
            id: "t-1".into(),
            org_id: "org-1".into(),
            owner_id: "u-1".into(),
            title: "call back".into(),
            due_at: None,
            completed: false,
            contact_id: None,
            deal_id: None,
            created_at: None,
            updated_at: None,
        };
        assert!(task.tags().is_none());
    }
}
