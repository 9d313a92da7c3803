// Authentication module
// Manages credential lifecycle, background refresh and auth events

mod clock;
mod events;
mod login;
mod manager;
mod scheduler;
mod store;
mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use events::{AuthEvent, AuthEventSink, RefreshTrigger, TracingEventSink};
pub use login::parse_login_response;
pub use manager::{AuthManager, AuthSettings};
pub use scheduler::{RefreshScheduler, SchedulerHandle};
pub use store::CredentialStore;
pub use types::{ApiKey, AuthRequest, AuthState, Credential, TokenInfo, TokenStatus};
