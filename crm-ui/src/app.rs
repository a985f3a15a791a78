use crate::actions::{self, money, operator_key, parse_operator, ListOp, Notice};
use crate::bridge::{self, FetchBackend};
use crm_core::filter::contact_fields;
use crm_core::{
    send_move, BulkAction, BulkDispatcher, CheckState, CrmBackend, DealBoard, InvalidationKey,
    ListQuery, ListView, LogicalOperator, MoveOutcome, Repository, Session,
};
use crm_effects::Effectful;
use crm_schema::{Contact, Deal, EntityKind, Pipeline};
use futures::lock::Mutex;
use leptos::*;
use std::rc::Rc;
use std::time::Duration;
use wasm_bindgen_futures::spawn_local;

const PAGE_SIZE: u32 = 25;
const BOARD_PAGE_SIZE: u32 = 500;
const POLL_INTERVAL: Duration = Duration::from_secs(3);

#[derive(Clone)]
struct Crm {
    session: Rc<Session>,
    repo: Rc<Repository<FetchBackend>>,
    dispatcher: Rc<BulkDispatcher>,
    contacts: Rc<Mutex<ListView<Contact>>>,
}

impl Crm {
    fn new(base_url: &str) -> Self {
        let session = Rc::new(Session::anonymous());
        if let Some(token) = bridge::stored_token() {
            session.sign_in(token, None, None);
        }
        Self {
            repo: Rc::new(Repository::new(FetchBackend::new(base_url, Rc::clone(&session)))),
            dispatcher: Rc::new(BulkDispatcher::default()),
            contacts: Rc::new(Mutex::new(ListView::new(contact_fields(), PAGE_SIZE))),
            session,
        }
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Tab {
    Contacts,
    Board,
}

fn confirm(message: &str) -> bool {
    web_sys::window()
        .and_then(|w| w.confirm_with_message(message).ok())
        .unwrap_or(false)
}

#[component]
pub fn App() -> impl IntoView {
    let crm = Crm::new("");
    let signed_in = create_rw_signal(crm.session.is_authenticated());
    let tab = create_rw_signal(Tab::Contacts);
    let token = create_rw_signal(String::new());
    // Bumped whenever the activity feed reports a change.
    let changed = create_rw_signal(0u64);
    let last_activity = store_value(0i64);
    let notice = create_rw_signal(None::<String>);
    let crm = store_value(crm);

    let sign_in = move || {
        let value = token.get_untracked().trim().to_string();
        if value.is_empty() {
            return;
        }
        crm.with_value(|c| c.session.sign_in(value.clone(), None, None));
        bridge::store_token(Some(&value));
        token.set(String::new());
        signed_in.set(true);
    };

    let sign_out = move || {
        crm.with_value(|c| {
            c.session.sign_out();
            c.repo.invalidate(InvalidationKey::All);
        });
        bridge::store_token(None);
        signed_in.set(false);
    };

    let poll = move || {
        if !signed_in.get_untracked() {
            return;
        }
        let crm = crm.get_value();
        spawn_local(async move {
            let after = last_activity.get_value();
            let Ok(feed) = crm.repo.backend().activity_after(after).await else {
                return;
            };
            if feed.is_empty() {
                return;
            }
            for entry in &feed {
                crm.repo
                    .invalidate(InvalidationKey::Record(entry.kind, entry.record_id.clone()));
            }
            if let Some(latest) = feed.last() {
                last_activity.set_value(latest.id.max(after));
                if after > 0 {
                    notice.set(Some(latest.description.clone()));
                }
            }
            changed.update(|n| *n += 1);
        });
    };
    poll();
    let _ = set_interval_with_handle(poll, POLL_INTERVAL);

    provide_context(crm);
    provide_context(changed);

    view! {
      <div class="app">
        <Show
          when=move || signed_in.get()
          fallback=move || view! {
            <section class="panel signin">
              <h2>"Sign in"</h2>
              <input
                type="password"
                prop:value=move || token.get()
                on:input=move |ev| token.set(event_target_value(&ev))
                placeholder="API token"
              />
              <button on:click=move |_| sign_in()>"Sign in"</button>
            </section>
          }
        >
          <nav class="row">
            <button class:active=move || tab.get() == Tab::Contacts on:click=move |_| tab.set(Tab::Contacts)>"Contacts"</button>
            <button class:active=move || tab.get() == Tab::Board on:click=move |_| tab.set(Tab::Board)>"Deals"</button>
            <span class="spacer"></span>
            <button on:click=move |_| sign_out()>"Sign out"</button>
          </nav>
          <Show when=move || notice.get().is_some() fallback=|| ()>
            <div class="notice" on:click=move |_| notice.set(None)>{move || notice.get().unwrap_or_default()}</div>
          </Show>
          {move || match tab.get() {
            Tab::Contacts => view! { <ContactsPanel/> }.into_view(),
            Tab::Board => view! { <BoardPanel/> }.into_view(),
          }}
        </Show>
      </div>
    }
}

#[component]
fn ContactsPanel() -> impl IntoView {
    let crm = expect_context::<StoredValue<Crm>>();
    let changed = expect_context::<RwSignal<u64>>();
    let snap = create_rw_signal(actions::ContactsSnapshot::default());
    let error = create_rw_signal(None::<String>);
    let status = create_rw_signal(None::<String>);
    let csv = create_rw_signal(None::<String>);
    let tag = create_rw_signal(String::new());
    let owner = create_rw_signal(String::new());

    let run = move |op: ListOp| {
        let crm = crm.get_value();
        spawn_local(async move {
            let mut view = crm.contacts.lock().await;
            let result = actions::perform(&crm.repo, &crm.dispatcher, &mut view, op).await;
            snap.set(actions::snapshot(&view));
            match result {
                Ok(Some(Notice::Message(message))) => {
                    error.set(None);
                    status.set(Some(message));
                }
                Ok(Some(Notice::Download(text))) => {
                    error.set(None);
                    csv.set(Some(text));
                }
                Ok(None) => error.set(None),
                Err(e) => error.set(Some(e.to_string())),
            }
        });
    };

    let bulk = move |action: BulkAction| {
        if action.effect().requires_confirmation() {
            let count = snap.with_untracked(|s| s.selected.len());
            if !confirm(&format!("Delete {count} contact(s)? This cannot be undone.")) {
                return;
            }
        }
        run(ListOp::Bulk(action));
    };

    create_effect(move |_| {
        let _ = changed.get();
        run(ListOp::Refresh);
    });

    let header_checkbox = move || {
        let check = snap.with(|s| s.check);
        view! {
          <input
            type="checkbox"
            prop:checked={check == CheckState::Checked}
            prop:indeterminate={check == CheckState::Indeterminate}
            on:change=move |ev| run(ListOp::SelectAll(event_target_checked(&ev)))
          />
        }
    };

    let rows = move || {
        snap.with(|s| {
            s.rows
                .iter()
                .map(|c| {
                    let id = c.id.clone();
                    let checked = s.is_selected(&c.id);
                    view! {
                      <tr class:selected=checked>
                        <td>
                          <input
                            type="checkbox"
                            prop:checked=checked
                            on:change=move |_| run(ListOp::Toggle(id.clone()))
                          />
                        </td>
                        <td>{c.display_name()}</td>
                        <td>{c.email.clone()}</td>
                        <td>{c.company.clone().unwrap_or_default()}</td>
                        <td>{c.status.clone()}</td>
                        <td class="meta">{c.tags.join(", ")}</td>
                      </tr>
                    }
                })
                .collect_view()
        })
    };

    let filter_rows = move || {
        snap.with(|s| {
            s.conditions
                .iter()
                .map(|row| {
                    let i = row.index;
                    let fields = s.fields.clone();
                    let current_field = row.condition.field.clone();
                    let current_op = row.condition.operator.map(operator_key).unwrap_or_default();
                    let logical = row.condition.logical_operator;
                    view! {
                      <div class="row condition">
                        {(i > 0).then(|| view! {
                          <select on:change=move |ev| {
                            let op = if event_target_value(&ev) == "OR" { LogicalOperator::Or } else { LogicalOperator::And };
                            run(ListOp::SetLogical(i, op));
                          }>
                            <option value="AND" selected={logical != Some(LogicalOperator::Or)}>"AND"</option>
                            <option value="OR" selected={logical == Some(LogicalOperator::Or)}>"OR"</option>
                          </select>
                        })}
                        <select on:change=move |ev| run(ListOp::SetField(i, event_target_value(&ev)))>
                          <option value="" selected={current_field.is_empty()}>"Field"</option>
                          {fields.into_iter().map(|f| {
                            let selected = f.name == current_field;
                            view! { <option value={f.name.clone()} selected=selected>{f.label.clone()}</option> }
                          }).collect_view()}
                        </select>
                        <select on:change=move |ev| {
                          if let Some(op) = parse_operator(&event_target_value(&ev)) {
                            run(ListOp::SetOperator(i, op));
                          }
                        }>
                          <option value="" selected={current_op.is_empty()}>"Operator"</option>
                          {row.operators.iter().map(|op| {
                            let key = operator_key(*op);
                            let selected = key == current_op;
                            view! { <option value=key selected=selected>{op.label()}</option> }
                          }).collect_view()}
                        </select>
                        <input
                          prop:value={row.condition.value.clone()}
                          on:change=move |ev| run(ListOp::SetValue(i, event_target_value(&ev)))
                          placeholder="Value"
                        />
                        <button on:click=move |_| run(ListOp::RemoveCondition(i))>"×"</button>
                      </div>
                    }
                })
                .collect_view()
        })
    };

    view! {
      <div class="layout">
        <section class="panel filters">
          <h2>"Filters" <span class="badge">{move || snap.with(|s| s.active_filters)}</span></h2>
          {filter_rows}
          <div class="row">
            <button on:click=move |_| run(ListOp::AddCondition)>"Add condition"</button>
            <button on:click=move |_| run(ListOp::ApplyFilter)>"Apply"</button>
            <button on:click=move |_| run(ListOp::ClearFilter)>"Clear"</button>
          </div>
        </section>

        <section class="panel">
          <h2>"Contacts"</h2>
          <Show when=move || snap.with(|s| !s.selected.is_empty()) fallback=|| ()>
            <div class="row bulk-bar">
              <span>{move || format!("{} selected", snap.with(|s| s.selected.len()))}</span>
              <input prop:value=move || tag.get() on:input=move |ev| tag.set(event_target_value(&ev)) placeholder="Tag"/>
              <button on:click=move |_| bulk(BulkAction::AddTag { tag: tag.get_untracked() })>"Add tag"</button>
              <button on:click=move |_| bulk(BulkAction::RemoveTag { tag: tag.get_untracked() })>"Remove tag"</button>
              <input prop:value=move || owner.get() on:input=move |ev| owner.set(event_target_value(&ev)) placeholder="Owner id"/>
              <button on:click=move |_| bulk(BulkAction::AssignOwner { owner_id: owner.get_untracked() })>"Assign"</button>
              <button on:click=move |_| bulk(BulkAction::Export)>"Export CSV"</button>
              <button class="danger" on:click=move |_| bulk(BulkAction::Delete)>"Delete"</button>
            </div>
          </Show>
          <table>
            <thead>
              <tr>
                <th>{header_checkbox}</th>
                <th>"Name"</th>
                <th>"Email"</th>
                <th>"Company"</th>
                <th>"Status"</th>
                <th>"Tags"</th>
              </tr>
            </thead>
            <tbody>{rows}</tbody>
          </table>
          <div class="row">
            <button
              prop:disabled=move || snap.with(|s| s.page == 0)
              on:click=move |_| run(ListOp::Page(snap.with_untracked(|s| s.page.saturating_sub(1))))
            >"Previous"</button>
            <span class="meta">{move || format!("page {}", snap.with(|s| s.page + 1))}</span>
            <button
              prop:disabled=move || snap.with(|s| (s.rows.len() as u32) < PAGE_SIZE)
              on:click=move |_| run(ListOp::Page(snap.with_untracked(|s| s.page + 1)))
            >"Next"</button>
          </div>
          <Show when=move || status.get().is_some() fallback=|| ()>
            <div class="meta">{move || status.get().unwrap_or_default()}</div>
          </Show>
          <Show when=move || csv.get().is_some() fallback=|| ()>
            <textarea class="export" readonly=true prop:value=move || csv.get().unwrap_or_default()></textarea>
          </Show>
          <Show when=move || error.get().is_some() fallback=|| ()>
            <pre class="error">{move || error.get().unwrap_or_default()}</pre>
          </Show>
        </section>
      </div>
    }
}

#[component]
fn BoardPanel() -> impl IntoView {
    let crm = expect_context::<StoredValue<Crm>>();
    let changed = expect_context::<RwSignal<u64>>();
    let board = create_rw_signal(DealBoard::new(Pipeline::default(), Vec::new()));
    let dragging = create_rw_signal(None::<String>);
    let error = create_rw_signal(None::<String>);

    let load = move || {
        let crm = crm.get_value();
        spawn_local(async move {
            let pipeline = crm.repo.stages().await;
            let deals = crm
                .repo
                .list::<Deal>(&ListQuery::with_page_size(BOARD_PAGE_SIZE))
                .await;
            match (pipeline, deals) {
                (Ok(pipeline), Ok(deals)) => {
                    board.update(|b| {
                        b.replace_pipeline(pipeline);
                        b.replace_deals(deals);
                    });
                    error.set(None);
                }
                (Err(e), _) | (_, Err(e)) => error.set(Some(e.to_string())),
            }
        });
    };

    create_effect(move |_| {
        let _ = changed.get();
        load();
    });

    let drop_on = move |stage: String| {
        let Some(deal_id) = dragging.get_untracked() else {
            return;
        };
        dragging.set(None);
        let mut begun = None;
        board.update(|b| begun = Some(b.begin_move(&deal_id, &stage)));
        let ticket = match begun {
            Some(Ok(Some(ticket))) => ticket,
            Some(Err(e)) => {
                error.set(Some(e.to_string()));
                return;
            }
            _ => return,
        };
        let crm = crm.get_value();
        spawn_local(async move {
            let result = send_move(crm.repo.backend(), &ticket).await;
            let mut outcome = None;
            board.update(|b| outcome = Some(b.finish_move(&ticket, result)));
            match outcome {
                Some(MoveOutcome::Confirmed(deal)) => {
                    crm.repo
                        .invalidate(InvalidationKey::Record(EntityKind::Deal, deal.id));
                    error.set(None);
                }
                Some(MoveOutcome::RolledBack(e)) => error.set(Some(format!("Move failed: {e}"))),
                _ => {}
            }
        });
    };

    let columns = move || {
        board.with(|b| {
            b.columns()
                .into_iter()
                .map(|column| {
                    let stage_id = column.stage.id.clone();
                    let pending = column
                        .deals
                        .iter()
                        .filter(|d| b.has_pending(&d.id))
                        .count();
                    view! {
                      <div
                        class="column"
                        style=format!("border-top-color: {}", column.stage.color)
                        on:dragover=|ev| ev.prevent_default()
                        on:drop=move |ev| {
                          ev.prevent_default();
                          drop_on(stage_id.clone());
                        }
                      >
                        <h3>{column.stage.name.clone()}</h3>
                        <div class="meta">
                          {format!("{} deals · {}", column.count, money(column.total_value))}
                          {(pending > 0).then(|| format!(" · {pending} saving"))}
                        </div>
                        <ul>
                          {column.deals.into_iter().map(|deal| {
                            let id = deal.id.clone();
                            view! {
                              <li
                                class="card"
                                draggable="true"
                                on:dragstart=move |_| dragging.set(Some(id.clone()))
                              >
                                <div><b>{deal.title.clone()}</b></div>
                                <div class="meta">{money(deal.value)}</div>
                              </li>
                            }
                          }).collect_view()}
                        </ul>
                      </div>
                    }
                })
                .collect_view()
        })
    };

    view! {
      <section class="panel">
        <h2>"Deals"</h2>
        <button on:click=move |_| load()>"Refresh"</button>
        <div class="board">{columns}</div>
        <Show when=move || error.get().is_some() fallback=|| ()>
          <pre class="error">{move || error.get().unwrap_or_default()}</pre>
        </Show>
      </section>
    }
}
