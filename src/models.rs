use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub student_id: String,
    pub lastname: String,
    pub firstname: String,
    pub middlename: Option<String>,
    pub year: i64,
    pub section: String,
    pub contact_number: String,
    pub gmail: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct StudentAccount {
    pub student_id: String,
    pub username: String,
    // ciphertext, stored as hex(iv):hex(ct)
    pub password: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Admin {
    pub id: i64,
    pub username: String,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    #[serde(rename = "start")]
    pub start_time: DateTime<Utc>,
    #[serde(rename = "end")]
    pub end_time: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub id: i64,
    pub student_id: String,
    pub event_id: String,
    // name fields are a snapshot taken at check-in time, so the historical
    // log stays accurate after the student row is edited
    pub firstname: String,
    pub middlename: Option<String>,
    pub lastname: String,
    pub year: i64,
    pub check_in_time: DateTime<Utc>,
    pub check_out_time: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attendance_records_serialize_with_camel_case_fields() {
        let record = AttendanceRecord {
            id: 1,
            student_id: "S1".to_string(),
            event_id: "E1".to_string(),
            firstname: "Juan".to_string(),
            middlename: None,
            lastname: "Reyes".to_string(),
            year: 2,
            check_in_time: Utc::now(),
            check_out_time: None,
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value.get("studentId").unwrap(), "S1");
        assert_eq!(value.get("eventId").unwrap(), "E1");
        assert!(value.get("checkInTime").is_some());
        assert!(value.get("checkOutTime").is_some());
    }

    #[test]
    fn events_serialize_start_and_end() {
        let event = Event {
            id: "abc".to_string(),
            name: "Orientation".to_string(),
            description: None,
            start_time: Utc::now(),
            end_time: Utc::now(),
            created_at: Utc::now(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert!(value.get("start").is_some());
        assert!(value.get("end").is_some());
        assert!(value.get("startTime").is_none());
    }
}
