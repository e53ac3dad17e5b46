use crate::models::{ConversationTurn, DateRange, Role};
use chrono::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct ChatGroup {
    pub group_index: usize,
    pub content: String,
    pub conversation_count: usize,
    pub date_range: DateRange,
    pub roles: Vec<Role>,
    pub turn_ids: Vec<String>,
}

pub fn group_turns(turns: &[ConversationTurn], idle_gap: Duration) -> Vec<&[ConversationTurn]> {
    let mut groups = Vec::new();
    let mut start = 0usize;

    for index in 1..turns.len() {
        if turns[index].created_at - turns[index - 1].created_at > idle_gap {
            groups.push(&turns[start..index]);
            start = index;
        }
    }
    if start < turns.len() {
        groups.push(&turns[start..]);
    }

    groups
}

pub fn render_group(turns: &[ConversationTurn]) -> String {
    turns
        .iter()
        .map(|turn| format!("{}: {}", turn.role, turn.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// `group_index` counts every group, kept or dropped.
pub fn build_chat_groups(
    turns: &[ConversationTurn],
    idle_gap: Duration,
    min_chars: usize,
) -> Vec<ChatGroup> {
    group_turns(turns, idle_gap)
        .into_iter()
        .enumerate()
        .filter_map(|(group_index, group)| {
            let content = render_group(group);
            if content.chars().count() < min_chars {
                return None;
            }

            let first = group.first()?;
            let last = group.last()?;
            let mut roles = Vec::new();
            for turn in group {
                if !roles.contains(&turn.role) {
                    roles.push(turn.role);
                }
            }

            Some(ChatGroup {
                group_index,
                content,
                conversation_count: group.len(),
                date_range: DateRange {
                    start: first.created_at,
                    end: last.created_at,
                },
                roles,
                turn_ids: group.iter().map(|turn| turn.id.clone()).collect(),
            })
        })
        .collect()
}

pub fn render_exchange(query: &str, answer: &str) -> String {
    format!("User: {query}\n\nAssistant: {answer}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, hour, minute, 0).unwrap()
    }

    fn turn(id: &str, role: Role, content: &str, created_at: DateTime<Utc>) -> ConversationTurn {
        ConversationTurn {
            id: id.to_string(),
            thread_id: "t-1".to_string(),
            user_id: "u-1".to_string(),
            role,
            content: content.to_string(),
            created_at,
            vectorized: false,
        }
    }

    #[test]
    fn idle_gap_over_an_hour_starts_new_group() {
        let turns = vec![
            turn("a", Role::User, "first", at(10, 0)),
            turn("b", Role::Assistant, "second", at(10, 1)),
            turn("c", Role::User, "third", at(11, 30)),
        ];
        let groups = group_turns(&turns, Duration::hours(1));
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].len(), 2);
        assert_eq!(groups[1][0].id, "c");
    }

    #[test]
    fn exactly_one_hour_stays_in_group() {
        let turns = vec![
            turn("a", Role::User, "first", at(10, 0)),
            turn("b", Role::Assistant, "second", at(11, 0)),
        ];
        assert_eq!(group_turns(&turns, Duration::hours(1)).len(), 1);
    }

    #[test]
    fn gap_is_measured_from_previous_turn() {
        let turns = vec![
            turn("a", Role::User, "first", at(10, 0)),
            turn("b", Role::Assistant, "second", at(10, 50)),
            turn("c", Role::User, "third", at(11, 40)),
        ];
        assert_eq!(group_turns(&turns, Duration::hours(1)).len(), 1);
    }

    #[test]
    fn short_groups_are_dropped() {
        let turns = vec![
            turn("a", Role::User, "hi", at(9, 0)),
            turn("b", Role::Assistant, "ok", at(9, 1)),
            turn(
                "c",
                Role::User,
                "Can you summarise the maintenance plan for the pumps?",
                at(12, 0),
            ),
            turn(
                "d",
                Role::Assistant,
                "The pumps are serviced every quarter by the north team.",
                at(12, 2),
            ),
        ];
        let groups = build_chat_groups(&turns, Duration::hours(1), 50);
        assert_eq!(groups.len(), 1);

        let group = &groups[0];
        assert_eq!(group.group_index, 1);
        assert_eq!(group.conversation_count, 2);
        assert_eq!(group.roles, vec![Role::User, Role::Assistant]);
        assert_eq!(group.date_range.start, at(12, 0));
        assert_eq!(group.date_range.end, at(12, 2));
        assert!(group.content.starts_with("user: Can you"));
        assert!(group.content.contains("\n\nassistant: The pumps"));
        assert_eq!(group.turn_ids, vec!["c".to_string(), "d".to_string()]);
    }

    #[test]
    fn no_turns_no_groups() {
        assert!(build_chat_groups(&[], Duration::hours(1), 50).is_empty());
    }
}
