// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Active-main selection (§4.F): pick which of an agent's main
//! conversation files is the one currently being driven, so peer agents
//! sharing a working directory don't all collapse onto the newest file.

use std::collections::HashSet;

use cse_core::Agent;
use cse_parsers::ConversationFile;

use crate::hint::ResumeHintResolver;

/// `mains` must already be sorted newest-first (the Discoverer contract).
/// `peers` is every registry agent sharing `agent`'s runtime and work
/// dir, `agent` included.
pub fn select_active_main(
    agent: &Agent,
    mains: &[ConversationFile],
    peers: &[Agent],
    hints: &dyn ResumeHintResolver,
) -> Option<ConversationFile> {
    if mains.is_empty() {
        return None;
    }

    if let Some(hint) = hints.resolve_hint(agent) {
        if let Some(f) = mains.iter().find(|f| f.native_conversation_id == hint) {
            return Some(f.clone());
        }
    }

    if peers.len() <= 1 {
        return Some(mains[0].clone());
    }

    let mut claimed: HashSet<String> = HashSet::new();
    let mut unresolved: Vec<&Agent> = Vec::new();
    for peer in peers {
        let matched = hints
            .resolve_hint(peer)
            .and_then(|hint| mains.iter().find(|f| f.native_conversation_id == hint));
        match matched {
            Some(f) if !claimed.contains(&f.native_conversation_id) => {
                claimed.insert(f.native_conversation_id.clone());
            }
            _ => unresolved.push(peer),
        }
    }

    unresolved.sort_by(|a, b| b.attached.cmp(&a.attached).then_with(|| a.name.cmp(&b.name)));

    let available: Vec<&ConversationFile> =
        mains.iter().filter(|f| !claimed.contains(&f.native_conversation_id)).collect();

    let idx = unresolved.iter().position(|a| a.name == agent.name);
    match idx {
        Some(i) if i < available.len() => Some(available[i].clone()),
        _ => available.first().map(|f| (*f).clone()).or_else(|| Some(mains[0].clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cse_core::Runtime;
    use std::path::PathBuf;
    use std::time::SystemTime;

    fn agent(name: &str, attached: bool) -> Agent {
        Agent {
            name: name.to_string(),
            runtime: Runtime::Claude,
            work_dir: PathBuf::from("/work"),
            pane_pid: None,
            attached,
        }
    }

    fn file(id: &str) -> ConversationFile {
        ConversationFile {
            path: PathBuf::from(format!("/work/{id}.jsonl")),
            conversation_id: format!("claude:a:{id}"),
            native_conversation_id: id.to_string(),
            is_subagent: false,
            modified: SystemTime::now(),
        }
    }

    struct MapHints(std::collections::HashMap<String, String>);
    impl ResumeHintResolver for MapHints {
        fn resolve_hint(&self, agent: &Agent) -> Option<String> {
            self.0.get(&agent.name).cloned()
        }
    }

    #[test]
    fn single_peer_picks_newest() {
        let a = agent("a", false);
        let mains = vec![file("old"), file("new")];
        let result = select_active_main(&a, &mains, &[a.clone()], &NullHintResolver);
        assert_eq!(result.unwrap().native_conversation_id, "old");
    }

    #[test]
    fn hint_match_wins_regardless_of_peer_count() {
        let a = agent("a", false);
        let mains = vec![file("old"), file("new")];
        let mut map = std::collections::HashMap::new();
        map.insert("a".to_string(), "new".to_string());
        let result = select_active_main(&a, &mains, &[a.clone()], &MapHints(map));
        assert_eq!(result.unwrap().native_conversation_id, "new");
    }

    #[test]
    fn multiple_peers_without_hints_distribute_by_attached_then_name() {
        let a = agent("a", false);
        let b = agent("b", true);
        let mains = vec![file("f1"), file("f2")];
        let peers = vec![a.clone(), b.clone()];

        // unresolved sorted: b (attached) first, then a.
        // available = [f1, f2] (newest-first, unclaimed).
        // b -> index 0 -> f1; a -> index 1 -> f2.
        let result_a = select_active_main(&a, &mains, &peers, &NullHintResolver);
        let result_b = select_active_main(&b, &mains, &peers, &NullHintResolver);
        assert_eq!(result_a.unwrap().native_conversation_id, "f2");
        assert_eq!(result_b.unwrap().native_conversation_id, "f1");
    }

    #[test]
    fn no_main_files_returns_none() {
        let a = agent("a", false);
        assert!(select_active_main(&a, &[], &[a.clone()], &NullHintResolver).is_none());
    }

    #[test]
    fn one_peer_claims_by_hint_the_other_gets_remaining_file() {
        let a = agent("a", false);
        let b = agent("b", false);
        let mains = vec![file("f1"), file("f2")];
        let peers = vec![a.clone(), b.clone()];
        let mut map = std::collections::HashMap::new();
        map.insert("b".to_string(), "f1".to_string());
        let hints = MapHints(map);

        let result_a = select_active_main(&a, &mains, &peers, &hints);
        assert_eq!(result_a.unwrap().native_conversation_id, "f2");
    }
}
