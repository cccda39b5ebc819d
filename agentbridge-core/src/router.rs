//! Router (spec C5): pure, deterministic agent selection. No I/O, no shared state beyond
//! the snapshot it's handed — easy to unit test exhaustively.

use crate::registry::AgentSnapshot;

/// Picks the best agent to serve `model` out of `agents`, or `None` if no connected
/// agent has it installed.
///
/// Candidates are agents with `model` in `installed_models`, ranked by:
/// 1. fewest `pending_requests` (load balancing)
/// 2. already has `model` loaded (avoids a `loadModel` round trip)
/// 3. agent id, ascending (deterministic tie-break)
pub fn select_agent<'a>(agents: &'a [AgentSnapshot], model: &str) -> Option<&'a AgentSnapshot> {
    agents
        .iter()
        .filter(|a| a.installed_models.contains(model))
        .min_by(|a, b| {
            let loaded_rank = |a: &AgentSnapshot| if a.loaded_models.contains(model) { 0 } else { 1 };
            a.pending_requests
                .cmp(&b.pending_requests)
                .then(loaded_rank(a).cmp(&loaded_rank(b)))
                .then(a.id.cmp(&b.id))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::HashSet;

    fn agent(id: &str, installed: &[&str], loaded: &[&str], pending: usize) -> AgentSnapshot {
        AgentSnapshot {
            id: id.to_string(),
            name: id.to_string(),
            installed_models: installed.iter().map(|s| s.to_string()).collect::<HashSet<_>>(),
            loaded_models: loaded.iter().map(|s| s.to_string()).collect::<HashSet<_>>(),
            pending_requests: pending,
            first_seen: Utc::now(),
            last_seen: Utc::now(),
        }
    }

    #[test]
    fn no_agent_has_model_returns_none() {
        let agents = vec![agent("a1", &["other"], &[], 0)];
        assert!(select_agent(&agents, "m1").is_none());
    }

    #[test]
    fn prefers_fewest_pending_requests() {
        let agents = vec![agent("a1", &["m1"], &[], 3), agent("a2", &["m1"], &[], 1)];
        assert_eq!(select_agent(&agents, "m1").unwrap().id, "a2");
    }

    #[test]
    fn ties_on_pending_prefer_already_loaded() {
        let agents = vec![agent("a1", &["m1"], &[], 1), agent("a2", &["m1"], &["m1"], 1)];
        assert_eq!(select_agent(&agents, "m1").unwrap().id, "a2");
    }

    #[test]
    fn full_tie_breaks_on_id() {
        let agents = vec![agent("b", &["m1"], &[], 0), agent("a", &["m1"], &[], 0)];
        assert_eq!(select_agent(&agents, "m1").unwrap().id, "a");
    }

    #[test]
    fn selection_is_deterministic_regardless_of_input_order() {
        let mut agents = vec![
            agent("a1", &["m1"], &[], 2),
            agent("a2", &["m1"], &["m1"], 2),
            agent("a3", &["m1"], &[], 0),
        ];
        let first = select_agent(&agents, "m1").unwrap().id.clone();
        agents.reverse();
        let second = select_agent(&agents, "m1").unwrap().id.clone();
        assert_eq!(first, second);
        assert_eq!(first, "a3");
    }
}
