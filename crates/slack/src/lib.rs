//! Slack integration for the support greeter.
//!
//! - **Socket Mode** (`socket`) - WebSocket connection to Slack (no public URL needed)
//! - **Events** (`events`) - envelope parsing and routing to handlers
//! - **Handlers** (`handlers`) - first-interaction welcomes and checkmark resolution
//! - **Web API** (`api`) - `chat.*`, `conversations.history` and `reactions.remove`
//!
//! ```text
//! Slack → SocketModeRunner → EventDispatcher → WelcomeHandler / ResolveHandler
//!                                                    ↓
//!                                   SlackApi (chat.postMessage, chat.update, ...)
//! ```

pub mod api;
pub mod events;
pub mod handlers;
pub mod messages;
pub mod socket;
