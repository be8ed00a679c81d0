// Library surface for the interview engine; the TUI in main.rs is a thin
// client over `runtime::SessionHandle`.
pub mod app_dirs;
pub mod collab;
pub mod config;
pub mod error;
pub mod ledger;
pub mod logging;
pub mod machine;
pub mod model;
pub mod policy;
pub mod question_bank;
pub mod recorder;
pub mod registry;
pub mod reports;
pub mod runtime;
pub mod sequencer;
pub mod store;
pub mod timer;
pub mod util;

pub use error::{Result, SessionError};
pub use machine::{Action, MachineState, SessionDeps, SessionMachine, SessionSettings, SessionView};
pub use model::{SessionId, UserId};
pub use runtime::{FixedTicker, SessionHandle, SessionRunner};
