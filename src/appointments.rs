//! Appointment lifecycle.
//!
//! ```text
//! pending ──approve──▶ confirmed ──complete──▶ completed
//!    │                     │
//!    ├──reject──▶ rejected │
//!    └──cancel──▶ canceled ◀──cancel──┘
//! ```
//!
//! Rescheduling is allowed while pending or confirmed. A patient's
//! reschedule sends the appointment back to pending; a doctor's confirms it.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use uuid::Uuid;

use crate::error::ApiError;
use crate::models::Role;

/// Stored as smallint in `appointment.status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[repr(i16)]
pub enum AppointmentStatus {
    Pending = 0,
    Confirmed = 1,
    Canceled = 2,
    Rejected = 3,
    Completed = 4,
}

impl AppointmentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "pending",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::Canceled => "canceled",
            AppointmentStatus::Rejected => "rejected",
            AppointmentStatus::Completed => "completed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            AppointmentStatus::Canceled | AppointmentStatus::Rejected | AppointmentStatus::Completed
        )
    }
}

impl std::fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Approve,
    Reject,
    Cancel,
    Complete,
    Reschedule,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Approve => "approve",
            Action::Reject => "reject",
            Action::Cancel => "cancel",
            Action::Complete => "complete",
            Action::Reschedule => "reschedule",
        }
    }

    fn allowed_for(self, role: Role) -> bool {
        match self {
            Action::Approve | Action::Reject | Action::Complete => role == Role::Doctor,
            Action::Cancel | Action::Reschedule => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("a {role} cannot {act} an appointment", act = .action.as_str())]
    NotAllowed { action: Action, role: Role },
    #[error("cannot {act} an appointment that is {from}", act = .action.as_str())]
    InvalidFrom { action: Action, from: AppointmentStatus },
}

impl From<TransitionError> for ApiError {
    fn from(e: TransitionError) -> Self {
        match e {
            TransitionError::NotAllowed { .. } => ApiError::Forbidden("FORBIDDEN", e.to_string()),
            TransitionError::InvalidFrom { .. } => {
                ApiError::Conflict("INVALID_TRANSITION", e.to_string())
            }
        }
    }
}

pub fn next_status(
    from: AppointmentStatus,
    action: Action,
    actor: Role,
) -> Result<AppointmentStatus, TransitionError> {
    use AppointmentStatus::*;

    if !action.allowed_for(actor) {
        return Err(TransitionError::NotAllowed { action, role: actor });
    }
    if from.is_terminal() {
        return Err(TransitionError::InvalidFrom { action, from });
    }

    let to = match (from, action) {
        (Pending, Action::Approve) => Confirmed,
        (Pending, Action::Reject) => Rejected,
        (Pending | Confirmed, Action::Cancel) => Canceled,
        (Confirmed, Action::Complete) => Completed,
        (Pending | Confirmed, Action::Reschedule) => match actor {
            Role::Patient => Pending,
            Role::Doctor => Confirmed,
        },
        _ => return Err(TransitionError::InvalidFrom { action, from }),
    };
    Ok(to)
}

/* -------------------------
   Date / time handling
--------------------------*/

pub fn parse_date(raw: &str) -> Result<NaiveDate, ApiError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| ApiError::validation("date must be YYYY-MM-DD"))
}

/// Accepts `14:30`, `14:30:00`, `2:30 PM` and `2:30PM`.
pub fn parse_time(raw: &str) -> Result<NaiveTime, ApiError> {
    let s = raw.trim().to_uppercase();
    const FORMATS: [&str; 4] = ["%H:%M", "%H:%M:%S", "%I:%M %p", "%I:%M%p"];
    FORMATS
        .iter()
        .find_map(|f| NaiveTime::parse_from_str(&s, f).ok())
        .ok_or_else(|| ApiError::validation("time must be HH:MM or HH:MM AM/PM"))
}

pub fn ensure_not_past(date: NaiveDate, today: NaiveDate) -> Result<(), ApiError> {
    if date < today {
        return Err(ApiError::validation("date cannot be in the past"));
    }
    Ok(())
}

fn serialize_hhmm<S: Serializer>(t: &NaiveTime, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&t.format("%H:%M").to_string())
}

/* -------------------------
   Rows
--------------------------*/

pub const APPOINTMENT_COLUMNS: &str = r#"
    appointment_id, patient_id, patient_name, doctor_id, doctor_name,
    appt_date, appt_time, reason, notes, status, created_at, updated_at
"#;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct AppointmentRow {
    pub appointment_id: Uuid,
    pub patient_id: Uuid,
    pub patient_name: String,
    pub doctor_id: Uuid,
    pub doctor_name: String,
    #[serde(rename = "date")]
    pub appt_date: NaiveDate,
    #[serde(rename = "time", serialize_with = "serialize_hhmm")]
    pub appt_time: NaiveTime,
    pub reason: Option<String>,
    pub notes: Option<String>,
    pub status: AppointmentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AppointmentRow {
    pub fn is_participant(&self, user_id: Uuid) -> bool {
        self.patient_id == user_id || self.doctor_id == user_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use AppointmentStatus::*;

    #[test]
    fn doctor_approves_and_rejects_pending() {
        assert_eq!(next_status(Pending, Action::Approve, Role::Doctor), Ok(Confirmed));
        assert_eq!(next_status(Pending, Action::Reject, Role::Doctor), Ok(Rejected));
        assert_eq!(next_status(Confirmed, Action::Complete, Role::Doctor), Ok(Completed));
    }

    #[test]
    fn patients_cannot_approve_reject_or_complete() {
        for action in [Action::Approve, Action::Reject, Action::Complete] {
            assert!(matches!(
                next_status(Pending, action, Role::Patient),
                Err(TransitionError::NotAllowed { .. })
            ));
        }
    }

    #[test]
    fn either_side_cancels_open_appointments() {
        for role in [Role::Patient, Role::Doctor] {
            assert_eq!(next_status(Pending, Action::Cancel, role), Ok(Canceled));
            assert_eq!(next_status(Confirmed, Action::Cancel, role), Ok(Canceled));
        }
    }

    #[test]
    fn terminal_states_accept_nothing() {
        let actions = [Action::Approve, Action::Reject, Action::Cancel, Action::Complete, Action::Reschedule];
        for from in [Canceled, Rejected, Completed] {
            assert!(from.is_terminal());
            for action in actions {
                assert!(next_status(from, action, Role::Doctor).is_err(), "{from} -> {action:?}");
            }
        }
    }

    #[test]
    fn cannot_approve_twice_or_complete_pending() {
        assert_eq!(
            next_status(Confirmed, Action::Approve, Role::Doctor),
            Err(TransitionError::InvalidFrom { action: Action::Approve, from: Confirmed })
        );
        assert!(next_status(Pending, Action::Complete, Role::Doctor).is_err());
        assert!(next_status(Confirmed, Action::Reject, Role::Doctor).is_err());
    }

    #[test]
    fn reschedule_depends_on_who_asks() {
        assert_eq!(next_status(Confirmed, Action::Reschedule, Role::Patient), Ok(Pending));
        assert_eq!(next_status(Pending, Action::Reschedule, Role::Doctor), Ok(Confirmed));
    }

    #[test]
    fn transition_errors_map_to_http() {
        let e: ApiError = next_status(Completed, Action::Cancel, Role::Patient).unwrap_err().into();
        assert_eq!(e.code(), "INVALID_TRANSITION");
        assert_eq!(e.to_string(), "cannot cancel an appointment that is completed");

        let e: ApiError = next_status(Pending, Action::Approve, Role::Patient).unwrap_err().into();
        assert_eq!(e.code(), "FORBIDDEN");
    }

    #[test]
    fn parses_both_time_styles() {
        let t = NaiveTime::from_hms_opt(14, 30, 0).unwrap();
        assert_eq!(parse_time("14:30").unwrap(), t);
        assert_eq!(parse_time("02:30 PM").unwrap(), t);
        assert_eq!(parse_time("2:30pm").unwrap(), t);
        assert_eq!(parse_time("14:30:00").unwrap(), t);
        assert_eq!(parse_time("12:00 AM").unwrap(), NaiveTime::from_hms_opt(0, 0, 0).unwrap());
        assert!(parse_time("25:00").is_err());
        assert!(parse_time("noon").is_err());
    }

    #[test]
    fn dates() {
        let d = parse_date(" 2026-03-01 ").unwrap();
        assert_eq!(d, NaiveDate::from_ymd_opt(2026, 3, 1).unwrap());
        assert!(parse_date("03/01/2026").is_err());

        let today = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        assert!(ensure_not_past(d, today).is_err());
        assert!(ensure_not_past(today, today).is_ok());
    }

    #[test]
    fn row_serializes_date_and_short_time() {
        let row = AppointmentRow {
            appointment_id: Uuid::new_v4(),
            patient_id: Uuid::new_v4(),
            patient_name: "Ann".into(),
            doctor_id: Uuid::new_v4(),
            doctor_name: "Dr. Grey".into(),
            appt_date: NaiveDate::from_ymd_opt(2026, 5, 4).unwrap(),
            appt_time: NaiveTime::from_hms_opt(9, 5, 0).unwrap(),
            reason: None,
            notes: None,
            status: Pending,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let v = serde_json::to_value(&row).unwrap();
        assert_eq!(v["date"], "2026-05-04");
        assert_eq!(v["time"], "09:05");
        assert_eq!(v["status"], "pending");
        assert!(row.is_participant(row.doctor_id));
    }
}
