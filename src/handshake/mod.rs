pub mod driver;
pub mod receive;
pub mod state;

pub use driver::{Session, SessionOutcome};
pub use receive::CancellationToken;
