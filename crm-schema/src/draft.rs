use crate::entity::{
    default_contact_status, Campaign, CampaignStatus, Channel, Contact, Deal, Record, Task,
};
use crate::pipeline::Pipeline;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("{0} is required")]
    MissingField(&'static str),
    #[error("invalid email '{0}'")]
    InvalidEmail(String),
    #[error("unknown stage '{0}'")]
    UnknownStage(String),
    #[error("{field} must not be negative")]
    Negative { field: &'static str },
}

/// Unsaved form input for a record. Validation runs client-side; a draft
/// that fails it is never submitted.
pub trait Draft: Clone + Serialize + for<'de> Deserialize<'de> + Send + Sync {
    type Output: Record;

    fn validate(&self, pipeline: &Pipeline) -> Result<(), ValidationError>;

    /// Build the stored record. Only the backend calls this; it owns ids and
    /// timestamps.
    fn into_record(self, id: String, org_id: String, now: DateTime<Utc>) -> Self::Output;
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactDraft {
    pub owner_id: String,
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Draft for ContactDraft {
    type Output = Contact;

    fn validate(&self, _pipeline: &Pipeline) -> Result<(), ValidationError> {
        require("ownerId", &self.owner_id)?;
        require("firstName", &self.first_name)?;
        require("email", &self.email)?;
        if !looks_like_email(self.email.trim()) {
            return Err(ValidationError::InvalidEmail(self.email.clone()));
        }
        Ok(())
    }

    fn into_record(self, id: String, org_id: String, now: DateTime<Utc>) -> Contact {
        Contact {
            id,
            org_id,
            owner_id: self.owner_id,
            first_name: self.first_name.trim().to_string(),
            last_name: self.last_name.trim().to_string(),
            email: self.email.trim().to_lowercase(),
            phone: self.phone,
            company: self.company,
            status: self.status.unwrap_or_else(default_contact_status),
            tags: dedup_tags(self.tags),
            created_at: Some(now),
            updated_at: Some(now),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DealDraft {
    pub owner_id: String,
    pub title: String,
    #[serde(default)]
    pub value: f64,
    pub stage: String,
    #[serde(default)]
    pub contact_id: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Draft for DealDraft {
    type Output = Deal;

    fn validate(&self, pipeline: &Pipeline) -> Result<(), ValidationError> {
        require("ownerId", &self.owner_id)?;
        require("title", &self.title)?;
        require("stage", &self.stage)?;
        if !pipeline.contains(&self.stage) {
            return Err(ValidationError::UnknownStage(self.stage.clone()));
        }
        if self.value < 0.0 {
            return Err(ValidationError::Negative { field: "value" });
        }
        Ok(())
    }

    fn into_record(self, id: String, org_id: String, now: DateTime<Utc>) -> Deal {
        Deal {
            id,
            org_id,
            owner_id: self.owner_id,
            title: self.title.trim().to_string(),
            value: self.value,
            stage: self.stage,
            contact_id: self.contact_id,
            tags: dedup_tags(self.tags),
            last_activity_at: Some(now),
            created_at: Some(now),
            updated_at: Some(now),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDraft {
    pub owner_id: String,
    pub title: String,
    #[serde(default)]
    pub due_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub contact_id: Option<String>,
    #[serde(default)]
    pub deal_id: Option<String>,
}

impl Draft for TaskDraft {
    type Output = Task;

    fn validate(&self, _pipeline: &Pipeline) -> Result<(), ValidationError> {
        require("ownerId", &self.owner_id)?;
        require("title", &self.title)
    }

    fn into_record(self, id: String, org_id: String, now: DateTime<Utc>) -> Task {
        Task {
            id,
            org_id,
            owner_id: self.owner_id,
            title: self.title.trim().to_string(),
            due_at: self.due_at,
            completed: false,
            contact_id: self.contact_id,
            deal_id: self.deal_id,
            created_at: Some(now),
            updated_at: Some(now),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignDraft {
    pub owner_id: String,
    pub name: String,
    pub channel: Channel,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
}

impl Draft for CampaignDraft {
    type Output = Campaign;

    fn validate(&self, _pipeline: &Pipeline) -> Result<(), ValidationError> {
        require("ownerId", &self.owner_id)?;
        require("name", &self.name)
    }

    fn into_record(self, id: String, org_id: String, now: DateTime<Utc>) -> Campaign {
        let status = if self.scheduled_at.is_some() {
            CampaignStatus::Scheduled
        } else {
            CampaignStatus::Draft
        };
        Campaign {
            id,
            org_id,
            owner_id: self.owner_id,
            name: self.name.trim().to_string(),
            channel: self.channel,
            status,
            tags: dedup_tags(self.tags),
            scheduled_at: self.scheduled_at,
            created_at: Some(now),
            updated_at: Some(now),
        }
    }
}

fn require(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        Err(ValidationError::MissingField(field))
    } else {
        Ok(())
    }
}

fn looks_like_email(value: &str) -> bool {
    let Some((local, domain)) = value.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && domain.contains('.')
        && !value.chars().any(char::is_whitespace)
}

/// Trim, drop empties and keep the first occurrence of each tag.
pub fn dedup_tags(tags: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags {
        let tag = tag.trim();
        if tag.is_empty() || out.iter().any(|t| t == tag) {
            continue;
        }
        out.push(tag.to_string());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact_draft() -> ContactDraft {
        ContactDraft {
            owner_id: "u-1".into(),
            first_name: "Grace".into(),
            last_name: "Hopper".into(),
            email: "grace@example.com".into(),
            ..Default::default()
        }
    }

    #[test]
    fn validates_contact_draft() {
        assert!(contact_draft().validate(&Pipeline::standard()).is_ok());
    }

    #[test]
    fn missing_first_name_is_rejected() {
        let draft = ContactDraft {
            first_name: "  ".into(),
            ..contact_draft()
        };
        assert_eq!(
            draft.validate(&Pipeline::standard()),
            Err(ValidationError::MissingField("firstName"))
        );
    }

    #[test]
    fn malformed_email_is_rejected() {
        for email in ["grace", "grace@", "@example.com", "grace@example", "gr ace@example.com"] {
            let draft = ContactDraft {
                email: email.into(),
                ..contact_draft()
            };
            assert!(
                matches!(
                    draft.validate(&Pipeline::standard()),
                    Err(ValidationError::InvalidEmail(_))
                ),
                "{email} should be rejected"
            );
        }
    }

    #[test]
    fn deal_stage_must_exist_in_pipeline() {
        let draft = DealDraft {
            owner_id: "u-1".into(),
            title: "Renewal".into(),
            value: 1200.0,
            stage: "archived".into(),
            ..Default::default()
        };
        assert_eq!(
            draft.validate(&Pipeline::standard()),
            Err(ValidationError::UnknownStage("archived".into()))
        );
    }

    #[test]
    fn into_record_sets_backend_fields_and_dedups_tags() {
        let now = Utc::now();
        let draft = ContactDraft {
            tags: vec!["vip".into(), " vip ".into(), "".into(), "beta".into()],
            ..contact_draft()
        };
        let contact = draft.into_record("c-9".into(), "org-1".into(), now);
        assert_eq!(contact.id, "c-9");
        assert_eq!(contact.tags, vec!["vip".to_string(), "beta".to_string()]);
        assert_eq!(contact.created_at, Some(now));
        assert_eq!(contact.status, "lead");
    }
}
