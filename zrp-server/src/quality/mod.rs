//! Quality engine: NCRs, CAPAs, ECOs.
//!
//! State machines:
//!
//! - NCR:  `open → investigating → resolved → closed`
//! - CAPA: `open → in_progress → verified → closed`
//! - ECO:  `draft → review → approved → implemented`, plus terminal
//!   `rejected` from any non-terminal state
//!
//! Transitions move forward only (skipping intermediate states is
//! allowed); moving backwards or out of a terminal state is a conflict.
//! Receiving-inspection failures auto-create NCRs; an ECO may reference
//! its source NCR through the `ncr_id` column.

pub mod capa;
pub mod eco;
pub mod ncr;

pub use capa::Capa;
pub use eco::Eco;
pub use ncr::{Ncr, NewNcr, create_ncr_tx};

use crate::utils::{AppError, AppResult};

/// Validate a forward-only transition over an ordered state list.
/// Returns the index delta or a conflict.
pub(crate) fn forward_transition(
    states: &[&str],
    current: &str,
    requested: &str,
    entity: &str,
) -> AppResult<()> {
    let from = states.iter().position(|s| *s == current);
    let to = states.iter().position(|s| *s == requested);
    match (from, to) {
        (Some(f), Some(t)) if t > f => Ok(()),
        (Some(_), Some(_)) => Err(AppError::conflict(format!(
            "Cannot move {entity} from {current} to {requested}"
        ))),
        _ => Err(AppError::validation(format!(
            "Unknown {entity} status {requested}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_only() {
        let states = ["open", "investigating", "resolved", "closed"];
        assert!(forward_transition(&states, "open", "investigating", "NCR").is_ok());
        // Skipping ahead is allowed.
        assert!(forward_transition(&states, "open", "closed", "NCR").is_ok());
        // Backwards is a conflict.
        let err = forward_transition(&states, "resolved", "open", "NCR").unwrap_err();
        assert_eq!(err.code, crate::utils::ErrorCode::Conflict);
        // Same state is a conflict.
        assert!(forward_transition(&states, "open", "open", "NCR").is_err());
        // Unknown state is invalid input.
        let err = forward_transition(&states, "open", "bogus", "NCR").unwrap_err();
        assert_eq!(err.code, crate::utils::ErrorCode::InvalidInput);
    }
}
