//! Clarification leaf; the question itself was set during planning

use tracing::info;

use crate::models::{AgentState, Progress, StateName};
use crate::workflow::update::StateUpdate;

pub fn run(state: &AgentState) -> StateUpdate {
    info!(
        "Asking for clarification: {}",
        state
            .clarification
            .as_ref()
            .map(|c| c.question.as_str())
            .unwrap_or("")
    );
    StateUpdate::with_progress(Progress::new(
        StateName::Clarifying,
        "Need clarification from user...",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ClarificationRequest;

    #[test]
    fn test_only_stamps_progress() {
        let mut state = AgentState::new("u1", "s1", "chart it", 3);
        state.clarification = Some(ClarificationRequest::new("Which metric?"));
        let update = run(&state);
        assert!(update.clarification.is_none());
        assert!(update.errors.is_empty());
        assert_eq!(
            update.progress.map(|p| p.current_state),
            Some(StateName::Clarifying)
        );
    }
}
