//! Conversation history growth policy

use std::num::NonZeroUsize;

use super::{Message, Role};

/// How much conversation history is kept between turns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HistoryPolicy {
    /// Keep everything for the life of the process
    #[default]
    Unbounded,
    /// Keep only the most recent N turns
    KeepLastTurns(NonZeroUsize),
}

impl HistoryPolicy {
    /// Policy from an optional turn limit, where `None` or zero means unbounded
    #[must_use]
    pub fn from_limit(limit: Option<usize>) -> Self {
        limit
            .and_then(NonZeroUsize::new)
            .map_or(Self::Unbounded, Self::KeepLastTurns)
    }

    /// Trim `history` in place and return the number of removed messages
    ///
    /// Leading system messages are always kept. Whole turns are dropped from
    /// the front, where a turn starts at a user message, so a tool call and
    /// its result are never separated.
    pub fn apply(&self, history: &mut Vec<Message>) -> usize {
        let Self::KeepLastTurns(limit) = *self else {
            return 0;
        };

        let seed_len = history
            .iter()
            .take_while(|m| m.role == Role::System)
            .count();

        let turn_starts: Vec<usize> = history
            .iter()
            .enumerate()
            .skip(seed_len)
            .filter(|(_, m)| m.role == Role::User)
            .map(|(i, _)| i)
            .collect();

        if turn_starts.len() <= limit.get() {
            return 0;
        }

        let cut = turn_starts[turn_starts.len() - limit.get()];
        history.drain(seed_len..cut);
        cut - seed_len
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::ToolCallRequest;
    use crate::tools::{ToolArgs, ToolResult};

    fn turn(n: usize, with_tool: bool) -> Vec<Message> {
        let mut msgs = vec![Message::user(format!("q{n}"))];
        if with_tool {
            let call = ToolCallRequest::new(format!("c{n}"), "t", ToolArgs::new());
            msgs.push(Message::assistant_with_tool_calls("", vec![call.clone()]));
            msgs.push(Message::tool_result(&call, &ToolResult::new()));
        }
        msgs.push(Message::assistant(format!("a{n}")));
        msgs
    }

    #[test]
    fn unbounded_keeps_everything() {
        let mut history = vec![Message::system("sys")];
        for n in 0..10 {
            history.extend(turn(n, false));
        }
        assert_eq!(HistoryPolicy::Unbounded.apply(&mut history), 0);
        assert_eq!(history.len(), 21);
    }

    #[test]
    fn zero_limit_is_unbounded() {
        assert_eq!(HistoryPolicy::from_limit(Some(0)), HistoryPolicy::Unbounded);
        assert_eq!(HistoryPolicy::from_limit(None), HistoryPolicy::Unbounded);
    }

    #[test]
    fn keeps_system_seed_and_last_turns() {
        let mut history = vec![Message::system("sys")];
        history.extend(turn(0, true));
        history.extend(turn(1, false));
        history.extend(turn(2, true));

        let policy = HistoryPolicy::from_limit(Some(2));
        let removed = policy.apply(&mut history);

        assert_eq!(removed, 4);
        assert_eq!(history[0], Message::system("sys"));
        assert_eq!(history[1], Message::user("q1"));
        assert_eq!(history.len(), 1 + 2 + 4);
    }

    #[test]
    fn never_leaves_orphaned_tool_results() {
        let mut history = vec![Message::system("sys")];
        for n in 0..5 {
            history.extend(turn(n, true));
        }
        HistoryPolicy::from_limit(Some(1)).apply(&mut history);

        assert_eq!(history[1].role, Role::User);
        let calls: Vec<_> = history
            .iter()
            .flat_map(|m| m.tool_calls.iter().map(|c| c.id.clone()))
            .collect();
        let answered: Vec<_> = history
            .iter()
            .filter_map(|m| m.tool_call_id.clone())
            .collect();
        assert_eq!(calls, answered);
    }
}
