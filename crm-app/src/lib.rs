//! Headless CRM client: the commands a UI calls, the activity poller and a
//! demo that drives both against an in-memory backend.

pub mod client;
pub mod commands;
pub mod config;
pub mod runtime;
pub mod state;

pub use client::HttpBackend;
pub use config::{init_tracing, AppConfig, ConfigError};
pub use state::AppState;

use crm_core::{BulkAction, CrmBackend, CrmError, InMemoryBackend, Session};
use crm_schema::{CampaignDraft, Channel, ContactDraft, DealDraft, TaskDraft};
use std::sync::Arc;

pub fn build_state(config: AppConfig) -> Result<AppState<HttpBackend>, String> {
    let session = Arc::new(Session::anonymous());
    if let Some(token) = &config.api_token {
        session.sign_in(token.clone(), None, None);
    }
    let backend = HttpBackend::new(config.api_url.clone(), Arc::clone(&session)).map_err(|e| e.to_string())?;
    Ok(AppState::new(backend, session, config))
}

pub fn build_demo_state() -> AppState<InMemoryBackend> {
    AppState::new(
        InMemoryBackend::new(),
        Arc::new(Session::with_token("demo")),
        AppConfig::default(),
    )
}

/// Print the first contacts page and the board, then follow the activity
/// feed until the process is stopped.
pub async fn run(config: AppConfig) -> Result<(), String> {
    let state = build_state(config)?;
    if !state.session.is_authenticated() {
        return Err(CrmError::NotAuthenticated.to_string());
    }

    let contacts = commands::list_records(&state, &state.contacts, None).await?;
    print_json("contacts", &contacts)?;
    let board = commands::get_board(&state).await?;
    print_json("board", &board)?;

    let poller = runtime::start_with_sink(&state, runtime::TracingSink);
    tokio::task::spawn_blocking(move || poller.join())
        .await
        .map_err(|e| e.to_string())?
        .map_err(|_| "activity poller panicked".to_string())
}

pub async fn run_demo() -> Result<(), String> {
    let state = build_demo_state();
    seed_demo_data(state.repo.backend())
        .await
        .map_err(|e| e.to_string())?;

    let contacts = commands::list_records(&state, &state.contacts, None).await?;
    print_json("contacts", &contacts)?;

    let leads = commands::apply_filter(
        &state,
        &state.contacts,
        vec![crm_core::FilterCondition {
            field: "status".into(),
            operator: Some(crm_core::Operator::Equals),
            value: "lead".into(),
            logical_operator: None,
        }],
    )
    .await?;
    print_json("leads", &leads)?;

    commands::select_all(&state.contacts, true).await;
    let tagged = commands::run_bulk(
        &state,
        &state.contacts,
        BulkAction::AddTag {
            tag: "follow-up".into(),
        },
    )
    .await?;
    print_json("bulk add_tag", &tagged)?;

    commands::select_all(&state.contacts, true).await;
    let csv = commands::export_contacts_csv(&state).await?;
    println!("export:\n{csv}");

    let board = commands::get_board(&state).await?;
    if let Some(deal) = board.columns.first().and_then(|c| c.deals.first()) {
        let moved = commands::move_deal(&state, deal.id.clone(), "proposal".into()).await?;
        print_json("move", &moved)?;
    }

    let sink = runtime::TracingSink;
    let mut last_id = 0;
    runtime::emit_updates(&state, &sink, &mut last_id).await;
    Ok(())
}

fn print_json(label: &str, value: &impl serde::Serialize) -> Result<(), String> {
    println!(
        "{label}:\n{}",
        serde_json::to_string_pretty(value).map_err(|e| e.to_string())?
    );
    Ok(())
}

/// A handful of contacts, deals across the pipeline, tasks and a campaign.
pub async fn seed_demo_data<B: CrmBackend>(backend: &B) -> Result<(), CrmError> {
    let owner = "u-demo".to_string();
    let contacts = [
        ("Ada", "Lovelace", "ada@example.com", "Analytical Engines", "customer"),
        ("Grace", "Hopper", "grace@example.com", "Navy Labs", "lead"),
        ("Alan", "Turing", "alan@example.com", "Bletchley", "lead"),
        ("Edsger", "Dijkstra", "edsger@example.com", "Eindhoven", "customer"),
        ("Barbara", "Liskov", "barbara@example.com", "CLU Systems", "lead"),
    ];
    let mut contact_ids = Vec::new();
    for (first, last, email, company, status) in contacts {
        let contact = backend
            .create(&ContactDraft {
                owner_id: owner.clone(),
                first_name: first.into(),
                last_name: last.into(),
                email: email.into(),
                company: Some(company.into()),
                status: Some(status.into()),
                tags: vec!["demo".into()],
                ..ContactDraft::default()
            })
            .await?;
        contact_ids.push(contact.id);
    }

    let deals = [
        ("Engine retrofit", 12_000.0, "new"),
        ("Compiler licence", 4_500.0, "contacted"),
        ("Cipher audit", 8_000.0, "proposal"),
        ("Routing study", 2_250.0, "closed_won"),
    ];
    for (i, (title, value, stage)) in deals.into_iter().enumerate() {
        backend
            .create(&DealDraft {
                owner_id: owner.clone(),
                title: title.into(),
                value,
                stage: stage.into(),
                contact_id: contact_ids.get(i).cloned(),
                ..DealDraft::default()
            })
            .await?;
    }

    for (title, contact_id) in [("Send proposal", contact_ids.get(2)), ("Book demo", contact_ids.get(1))] {
        backend
            .create(&TaskDraft {
                owner_id: owner.clone(),
                title: title.into(),
                contact_id: contact_id.cloned(),
                ..TaskDraft::default()
            })
            .await?;
    }

    backend
        .create(&CampaignDraft {
            owner_id: owner,
            name: "Spring newsletter".into(),
            channel: Channel::Email,
            tags: vec!["newsletter".into()],
            scheduled_at: None,
        })
        .await?;
    Ok(())
}
