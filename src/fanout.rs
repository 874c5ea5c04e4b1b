//! Per-recipient notification fan-out for published updates.
//!
//! The builder is a pure computation over a directory snapshot: resolve the
//! target audience, resolve mentions, union the two, and emit exactly one
//! draft per recipient. Persistence (insert-if-absent keyed on
//! `(update_id, recipient_id)`) is the caller's job, so replays are safe.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Who an update is addressed to. Stored as tagged JSON on the update row,
/// so malformed targeting fails at parse time instead of at delivery time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Audience {
    All,
    Roles { roles: BTreeSet<String> },
    Users {
        #[serde(rename = "userIds")]
        user_ids: BTreeSet<String>,
    },
}

impl Default for Audience {
    fn default() -> Self {
        Audience::All
    }
}

#[derive(Debug, Clone)]
pub struct DirectoryUser {
    pub id: String,
    pub username: String,
    pub role: String,
    pub active: bool,
}

#[derive(Debug, Clone)]
pub struct UpdateSnapshot<'a> {
    pub id: &'a str,
    pub title: &'a str,
    pub content: &'a str,
    pub audience: &'a Audience,
    pub mentioned_usernames: &'a [String],
}

#[derive(Debug, Clone, PartialEq)]
pub struct NotificationDraft {
    pub update_id: String,
    pub recipient_id: String,
    pub title: String,
    pub message: String,
}

const MENTION_PREVIEW_CHARS: usize = 100;

fn mention_preview(content: &str) -> String {
    if content.chars().count() <= MENTION_PREVIEW_CHARS {
        return content.to_string();
    }
    let head: String = content.chars().take(MENTION_PREVIEW_CHARS).collect();
    format!("{}...", head)
}

/// Build the deduplicated delivery set for one published update.
///
/// A recipient reachable through more than one rule gets one draft; being
/// mentioned wins over plain audience membership for the wording. Unresolved
/// mention names are dropped silently (a typo'd mention must not fail the
/// publish). Output is ordered by recipient id, so identical inputs always
/// produce identical output.
pub fn build_notifications(
    update: &UpdateSnapshot<'_>,
    directory: &[DirectoryUser],
) -> Vec<NotificationDraft> {
    let mut audience_ids: BTreeSet<&str> = BTreeSet::new();
    for user in directory.iter().filter(|u| u.active) {
        let included = match update.audience {
            Audience::All => true,
            Audience::Roles { roles } => roles.contains(&user.role),
            Audience::Users { user_ids } => user_ids.contains(&user.id),
        };
        if included {
            audience_ids.insert(user.id.as_str());
        }
    }

    // Case-insensitive exact match against active usernames.
    let by_username: BTreeMap<String, &str> = directory
        .iter()
        .filter(|u| u.active)
        .map(|u| (u.username.to_ascii_lowercase(), u.id.as_str()))
        .collect();
    let mut mentioned_ids: BTreeSet<&str> = BTreeSet::new();
    for name in update.mentioned_usernames {
        if let Some(id) = by_username.get(&name.to_ascii_lowercase()) {
            mentioned_ids.insert(id);
        }
    }

    let mut recipients: BTreeSet<&str> = audience_ids;
    recipients.extend(mentioned_ids.iter().copied());

    recipients
        .into_iter()
        .map(|recipient_id| {
            if mentioned_ids.contains(recipient_id) {
                NotificationDraft {
                    update_id: update.id.to_string(),
                    recipient_id: recipient_id.to_string(),
                    title: format!("You were mentioned in: {}", update.title),
                    message: mention_preview(update.content),
                }
            } else {
                NotificationDraft {
                    update_id: update.id.to_string(),
                    recipient_id: recipient_id.to_string(),
                    title: update.title.to_string(),
                    message: update.content.to_string(),
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: &str, username: &str, role: &str, active: bool) -> DirectoryUser {
        DirectoryUser {
            id: id.to_string(),
            username: username.to_string(),
            role: role.to_string(),
            active,
        }
    }

    fn roles(names: &[&str]) -> Audience {
        Audience::Roles {
            roles: names.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn snapshot<'a>(
        audience: &'a Audience,
        mentions: &'a [String],
    ) -> UpdateSnapshot<'a> {
        UpdateSnapshot {
            id: "u1",
            title: "Holiday notice",
            content: "Classes closed Friday",
            audience,
            mentioned_usernames: mentions,
        }
    }

    #[test]
    fn mentioned_student_in_targeted_role_gets_exactly_one_record() {
        let directory = vec![
            user("s1", "asha", "student", true),
            user("s2", "vik", "student", true),
            user("a1", "admin1", "admin", true),
        ];
        let audience = roles(&["student"]);
        let mentions = vec!["asha".to_string()];
        let drafts = build_notifications(&snapshot(&audience, &mentions), &directory);

        assert_eq!(drafts.len(), 2);
        let asha: Vec<_> = drafts.iter().filter(|d| d.recipient_id == "s1").collect();
        assert_eq!(asha.len(), 1);
        assert!(asha[0].title.starts_with("You were mentioned in:"));
        assert_eq!(
            drafts.iter().find(|d| d.recipient_id == "s2").map(|d| d.title.as_str()),
            Some("Holiday notice")
        );
    }

    #[test]
    fn audience_all_reaches_every_active_user_only() {
        let directory = vec![
            user("s1", "asha", "student", true),
            user("s2", "vik", "student", false),
            user("a1", "admin1", "admin", true),
        ];
        let audience = Audience::All;
        let drafts = build_notifications(&snapshot(&audience, &[]), &directory);
        let ids: Vec<&str> = drafts.iter().map(|d| d.recipient_id.as_str()).collect();
        assert_eq!(ids, ["a1", "s1"]);
    }

    #[test]
    fn explicit_user_targeting_drops_unknown_and_inactive_ids() {
        let directory = vec![
            user("s1", "asha", "student", true),
            user("s2", "vik", "student", false),
        ];
        let audience = Audience::Users {
            user_ids: ["s1", "s2", "ghost"].iter().map(|s| s.to_string()).collect(),
        };
        let drafts = build_notifications(&snapshot(&audience, &[]), &directory);
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].recipient_id, "s1");
    }

    #[test]
    fn mention_resolution_is_case_insensitive_and_typos_are_dropped() {
        let directory = vec![user("s1", "Asha", "student", true)];
        let audience = Audience::Users {
            user_ids: BTreeSet::new(),
        };
        let mentions = vec!["ASHA".to_string(), "nosuchuser".to_string()];
        let drafts = build_notifications(&snapshot(&audience, &mentions), &directory);
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].recipient_id, "s1");
    }

    #[test]
    fn identical_inputs_build_identical_output() {
        let directory = vec![
            user("s3", "c", "student", true),
            user("s1", "a", "student", true),
            user("s2", "b", "student", true),
        ];
        let audience = Audience::All;
        let first = build_notifications(&snapshot(&audience, &[]), &directory);
        let second = build_notifications(&snapshot(&audience, &[]), &directory);
        assert_eq!(first, second);
        let ids: Vec<&str> = first.iter().map(|d| d.recipient_id.as_str()).collect();
        assert_eq!(ids, ["s1", "s2", "s3"]);
    }

    #[test]
    fn long_content_is_previewed_for_mention_records() {
        let long = "x".repeat(150);
        let audience = Audience::Users {
            user_ids: BTreeSet::new(),
        };
        let mentions = vec!["asha".to_string()];
        let update = UpdateSnapshot {
            id: "u1",
            title: "T",
            content: &long,
            audience: &audience,
            mentioned_usernames: &mentions,
        };
        let directory = vec![user("s1", "asha", "student", true)];
        let drafts = build_notifications(&update, &directory);
        assert_eq!(drafts[0].message.chars().count(), 103);
        assert!(drafts[0].message.ends_with("..."));
    }

    #[test]
    fn audience_json_round_trips_through_the_tagged_form() {
        let parsed: Audience =
            serde_json::from_str(r#"{"kind":"roles","roles":["student"]}"#).expect("parse");
        assert_eq!(parsed, roles(&["student"]));
        let all: Audience = serde_json::from_str(r#"{"kind":"all"}"#).expect("parse");
        assert_eq!(all, Audience::All);
    }
}
