//! Browser front-end for the CRM: contacts with bulk actions and filters,
//! and the deal board.

pub mod actions;
pub mod app;
pub mod bridge;

pub use app::App;
