//! Ports: the interfaces the engine requires its host to provide, and the
//! capability seam between header-only and full verification.

pub mod connector;
pub mod listener;
pub mod script;
pub mod store;
pub mod time;

pub use connector::TransactionConnector;
pub use listener::{ChainListener, ListenerError, NewBlockKind};
pub use script::{AcceptAllScripts, ScriptPredicate};
pub use store::{BlockStore, StoreError, UndoableBlock};
pub use time::{FixedTimeSource, SystemTimeSource, TimeSource};
