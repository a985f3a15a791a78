//! Record shapes shared by the CRM client, server and UI.
//!
//! Everything here is plain data plus the client-side validation that runs
//! before a draft is ever sent to the backend.

pub mod activity;
pub mod draft;
pub mod entity;
pub mod envelope;
pub mod pipeline;

pub use activity::{Activity, ActivityAction, ActivityCursor};
pub use draft::{CampaignDraft, ContactDraft, DealDraft, Draft, TaskDraft, ValidationError};
pub use entity::{
    Campaign, CampaignStatus, Channel, Contact, Deal, EntityKind, Organization, Record, Task, User,
};
pub use envelope::{normalize, Envelope, EnvelopeError};
pub use pipeline::{Pipeline, StageConfig};
