//! Client-side CRM core: selection, filters, bulk actions, the deal board and
//! the cache in front of the backend.
//!
//! Nothing here depends on a particular runtime. The same code drives the
//! native client (tokio) and the browser UI (wasm).

#![allow(async_fn_in_trait)]

pub mod backend;
pub mod board;
pub mod bulk;
pub mod error;
pub mod export;
pub mod filter;
pub mod list;
pub mod memory;
pub mod repository;
pub mod selection;
pub mod session;

pub use backend::{CrmBackend, ListQuery, DEFAULT_PAGE_SIZE};
pub use board::{drop_card, send_move, BoardColumn, DealBoard, MoveOutcome, MoveTicket, StageMove};
pub use bulk::{BulkAction, BulkDispatcher, BulkItem, BulkReport, ItemStatus, DEFAULT_BULK_CONCURRENCY};
pub use error::{CrmError, CrmResult};
pub use export::to_csv;
pub use filter::{
    Criterion, FieldDef, FieldType, Filter, FilterBuilder, FilterCondition, LogicalOperator,
    Operator,
};
pub use list::ListView;
pub use memory::{BackendCall, InMemoryBackend};
pub use repository::{InvalidationKey, Repository};
pub use selection::{CheckState, Selection};
pub use session::Session;
