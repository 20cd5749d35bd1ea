pub mod equity;
pub mod reduction;

pub use equity::{AccountHealth, ClosedOutcome, EquityWalk, HealthBand, OutcomeKind};
pub use reduction::{ChainEntry, PositionSnapshot};
