pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::calendar_sync::{CalendarSyncService, UpcomingSnapshot};
pub use application::commands::AppState;
pub use application::navigation_gate::{decide_route, GateState, NavigationGate, Router};
pub use domain::models::{AuthUser, CalendarEvent, EventDraft, EventType, EventUpdate, Route};
pub use infrastructure::error::InfraError;
