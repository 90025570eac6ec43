//! Conversation and message types plus the per-viewer inbox view.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::ApiError;
use crate::models::Role;

pub const MAX_MESSAGE_CHARS: usize = 4000;
const PREVIEW_CHARS: usize = 140;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct MessageRow {
    pub message_id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub sender_role: Role,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ConversationRow {
    pub conversation_id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub patient_name: String,
    pub doctor_name: String,
    pub last_message_text: String,
    pub updated_at: DateTime<Utc>,
}

impl ConversationRow {
    pub fn has_participant(&self, user_id: Uuid) -> bool {
        self.patient_id == user_id || self.doctor_id == user_id
    }

    pub fn participants(&self) -> [Uuid; 2] {
        [self.patient_id, self.doctor_id]
    }
}

/// A conversation as seen from one side: the "counterpart" is whoever the
/// viewer is talking to.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationView {
    pub conversation_id: Uuid,
    pub counterpart_id: Uuid,
    pub counterpart_name: String,
    pub counterpart_role: Role,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub last_message_text: String,
    pub updated_at: DateTime<Utc>,
}

impl ConversationView {
    pub fn for_viewer(row: ConversationRow, viewer_role: Role) -> Self {
        let (counterpart_id, counterpart_name) = match viewer_role {
            Role::Patient => (row.doctor_id, row.doctor_name),
            Role::Doctor => (row.patient_id, row.patient_name),
        };
        Self {
            conversation_id: row.conversation_id,
            counterpart_id,
            counterpart_name,
            counterpart_role: viewer_role.counterpart(),
            patient_id: row.patient_id,
            doctor_id: row.doctor_id,
            last_message_text: row.last_message_text,
            updated_at: row.updated_at,
        }
    }
}

/// Builds the inbox list: counterpart-name filter (case-insensitive
/// substring), most recently updated first.
pub fn inbox_view(
    rows: Vec<ConversationRow>,
    viewer_role: Role,
    search: Option<&str>,
) -> Vec<ConversationView> {
    let needle = search
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_lowercase);

    let mut views: Vec<ConversationView> = rows
        .into_iter()
        .map(|row| ConversationView::for_viewer(row, viewer_role))
        .filter(|v| match &needle {
            Some(n) => v.counterpart_name.to_lowercase().contains(n.as_str()),
            None => true,
        })
        .collect();

    views.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    views
}

pub fn validate_message_text(raw: &str) -> Result<String, ApiError> {
    let text = raw.trim();
    if text.is_empty() {
        return Err(ApiError::validation("Message text is required"));
    }
    if text.chars().count() > MAX_MESSAGE_CHARS {
        return Err(ApiError::validation(format!(
            "Message must be at most {MAX_MESSAGE_CHARS} characters"
        )));
    }
    Ok(text.to_string())
}

/// Shortened copy of a message for `conversation.last_message_text`.
pub fn preview_of(text: &str) -> String {
    if text.chars().count() <= PREVIEW_CHARS {
        return text.to_string();
    }
    let mut s: String = text.chars().take(PREVIEW_CHARS - 1).collect();
    s.push('…');
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn conv(patient: &str, doctor: &str, minutes_ago: i64) -> ConversationRow {
        ConversationRow {
            conversation_id: Uuid::new_v4(),
            patient_id: Uuid::new_v4(),
            doctor_id: Uuid::new_v4(),
            patient_name: patient.into(),
            doctor_name: doctor.into(),
            last_message_text: String::new(),
            updated_at: Utc::now() - Duration::minutes(minutes_ago),
        }
    }

    #[test]
    fn inbox_is_sorted_newest_first() {
        let rows = vec![conv("Ann", "Dr. House", 30), conv("Bob", "Dr. Grey", 5), conv("Cid", "Dr. Who", 60)];
        let names: Vec<_> = inbox_view(rows, Role::Doctor, None)
            .into_iter()
            .map(|v| v.counterpart_name)
            .collect();
        assert_eq!(names, vec!["Bob", "Ann", "Cid"]);
    }

    #[test]
    fn inbox_search_matches_counterpart_only() {
        let rows = vec![conv("Ann Smith", "Dr. Annika", 1), conv("Bob", "Dr. Grey", 2)];

        let doctor_view = inbox_view(rows.clone(), Role::Doctor, Some("  ANN "));
        assert_eq!(doctor_view.len(), 1);
        assert_eq!(doctor_view[0].counterpart_name, "Ann Smith");
        assert_eq!(doctor_view[0].counterpart_role, Role::Patient);

        let patient_view = inbox_view(rows.clone(), Role::Patient, Some("grey"));
        assert_eq!(patient_view.len(), 1);
        assert_eq!(patient_view[0].counterpart_name, "Dr. Grey");

        assert_eq!(inbox_view(rows, Role::Patient, Some("")).len(), 2);
    }

    #[test]
    fn message_text_rules() {
        assert_eq!(validate_message_text("  hi there \n").unwrap(), "hi there");
        assert!(validate_message_text("   ").is_err());
        assert!(validate_message_text(&"x".repeat(MAX_MESSAGE_CHARS + 1)).is_err());
        assert!(validate_message_text(&"x".repeat(MAX_MESSAGE_CHARS)).is_ok());
    }

    #[test]
    fn preview_truncates_long_text() {
        assert_eq!(preview_of("short"), "short");
        let long = "é".repeat(500);
        let p = preview_of(&long);
        assert_eq!(p.chars().count(), PREVIEW_CHARS);
        assert!(p.ends_with('…'));
    }

    #[test]
    fn participants() {
        let c = conv("Ann", "Dr. X", 0);
        assert!(c.has_participant(c.patient_id));
        assert!(c.has_participant(c.doctor_id));
        assert!(!c.has_participant(Uuid::new_v4()));
    }
}
