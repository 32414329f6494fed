//! Service clients and dispatch machinery

pub mod dispatcher;
pub mod event_log;
pub mod inference;
pub mod lifecycle;
pub mod webhook;

pub use dispatcher::{DispatchSummary, StageDispatcher, StageKind, StageSpec};
pub use event_log::EventLog;
pub use inference::InferenceClient;
pub use lifecycle::{ComputeLifecycle, MediatorClient};
pub use webhook::WebhookClient;
