//! Controllers: the email reconciler, the sender-config observer and the
//! runtime that drives them.

pub mod dispatcher;
pub mod email;
pub mod resolver;
pub mod runtime;
pub mod sender_config;

pub use dispatcher::{Dispatcher, HttpDispatcher, OutboundEmail, build_http_client};
pub use email::EmailReconciler;
pub use resolver::{ResolvedSender, Resolver, StoreResolver};
pub use runtime::{Action, Backoff, Controller, Reconciler};
pub use sender_config::{ConfigEvent, SenderConfigObserver};
