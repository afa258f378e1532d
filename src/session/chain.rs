use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::PathBuf;

use super::{ChainInfo, Session};

/// Group sessions that look like one conversation continued across files.
///
/// Sessions sharing a project and a case/whitespace-insensitive title form a
/// chain. Unrelated sessions that happen to share both are merged too; the
/// grouping is a heuristic. Output is sorted newest first.
pub fn group_sessions_into_chains(sessions: Vec<Session>) -> Vec<Session> {
    let mut buckets: HashMap<(PathBuf, String), Vec<Session>> = HashMap::new();
    for session in sessions {
        let key = (session.project.clone(), session.title.trim().to_lowercase());
        buckets.entry(key).or_default().push(session);
    }

    let mut result = Vec::new();
    for (_, mut members) in buckets {
        if members.len() == 1 {
            result.append(&mut members);
            continue;
        }

        members.sort_by(newest_first);
        let chain_id = members[0].id.clone();
        let chain_length = members.len();

        result.extend(members.into_iter().enumerate().map(|(chain_index, mut session)| {
            session.chain = Some(ChainInfo {
                chain_id: chain_id.clone(),
                chain_index,
                chain_length,
            });
            session
        }));
    }

    result.sort_by(newest_first);
    result
}

/// Newest first; equal modification times fall back to id so the order is
/// stable across runs.
fn newest_first(a: &Session, b: &Session) -> Ordering {
    b.last_modified
        .cmp(&a.last_modified)
        .then_with(|| a.id.cmp(&b.id))
}
