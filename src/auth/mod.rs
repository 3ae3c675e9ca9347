mod flow;
mod tokens;

pub use flow::{AuthFlow, AuthSettings, Navigation, StepOutcome, AUTH_CALLBACK_PATH, OAUTH_SCOPE};
pub use tokens::{TokenSet, TokenStore, TokenValue};
