pub mod amount;
pub mod config;
pub mod context;
pub mod dryrun;
pub mod error;
pub mod fees;
pub mod io;
pub mod loan;
pub mod paths;
pub mod program;
pub mod runtime;
pub mod scheduler;
pub mod state;
pub mod store;
pub mod types;
pub mod wallet;

pub use error::{ActionQueueError, Result};
pub use program::{make_action_program, ActionProgram};
pub use runtime::ActionQueue;
