/*
[INPUT]:  Endpoint catalog, session credentials and keep-alive configuration
[OUTPUT]: Decoded event stream and a supervised, self-healing session
[POS]:    WebSocket layer - protocol, transport and lifecycle
[UPDATE]: When adding frame kinds, events or lifecycle tasks
*/

pub mod dispatcher;
pub mod frame;
pub mod keep_alive;
pub mod message;
pub mod regions;
pub mod session;

pub use dispatcher::{CallbackError, CallbackResult, EventCallback, EventDispatcher, EventSubscriber, SubscriptionId};
pub use frame::Frame;
pub use keep_alive::{KeepAliveManager, KeepAliveSettings};
pub use message::{ClientEvent, EventKind};
pub use regions::Endpoint;
pub use session::{SessionCounters, TransportSession};
