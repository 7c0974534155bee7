use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::error::ValidationError;

// =============================================================================
// Secrets: redacted Debug, zeroized on drop (via `secrecy`)
// =============================================================================

macro_rules! secret_string {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        pub struct $name(SecretString);

        impl $name {
            pub fn new(s: impl Into<String>) -> Self {
                Self(SecretString::new(s.into()))
            }

            #[must_use]
            pub fn expose(&self) -> &str {
                self.0.expose_secret()
            }

            #[must_use]
            pub fn is_empty(&self) -> bool {
                self.expose().is_empty()
            }
        }

        impl Clone for $name {
            fn clone(&self) -> Self {
                Self::new(self.expose())
            }
        }

        impl PartialEq for $name {
            fn eq(&self, other: &Self) -> bool {
                self.expose() == other.expose()
            }
        }

        impl Eq for $name {}

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("[REDACTED]")
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.expose())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                String::deserialize(deserializer).map(Self::new)
            }
        }
    };
}

secret_string!(
    /// Bearer token issued by the API.
    AuthToken
);

secret_string!(Password);

// =============================================================================
// Typed IDs
// =============================================================================

macro_rules! typed_id {
    ($name:ident) => {
        #[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, Default)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

typed_id!(UserId);
typed_id!(ReportId);

// =============================================================================
// Coordinate: validated, NaN-safe
// =============================================================================

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawCoordinate")]
pub struct Coordinate {
    latitude: f64,
    longitude: f64,
}

#[derive(Deserialize)]
struct RawCoordinate {
    #[serde(alias = "lat")]
    latitude: f64,
    #[serde(alias = "lng", alias = "lon")]
    longitude: f64,
}

impl TryFrom<RawCoordinate> for Coordinate {
    type Error = ValidationError;

    fn try_from(raw: RawCoordinate) -> Result<Self, Self::Error> {
        Self::new(raw.latitude, raw.longitude)
    }
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, ValidationError> {
        if !latitude.is_finite()
            || !longitude.is_finite()
            || !(-90.0..=90.0).contains(&latitude)
            || !(-180.0..=180.0).contains(&longitude)
        {
            return Err(ValidationError::InvalidCoordinate(latitude, longitude));
        }
        Ok(Self { latitude, longitude })
    }

    #[must_use]
    pub const fn latitude(&self) -> f64 {
        self.latitude
    }

    #[must_use]
    pub const fn longitude(&self) -> f64 {
        self.longitude
    }
}

// =============================================================================
// Users
// =============================================================================

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    #[default]
    Citizen,
    Ngo,
    Government,
    Researcher,
    Admin,
    #[serde(other)]
    Other,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(alias = "_id")]
    pub id: UserId,
    #[serde(default)]
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub role: UserRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default)]
    pub points: u32,
    #[serde(default)]
    pub badges: Vec<String>,
    #[serde(default, alias = "is_verified")]
    pub is_verified: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rank: Option<u32>,
    #[serde(default, alias = "total_reports", skip_serializing_if = "Option::is_none")]
    pub total_reports: Option<u32>,
    #[serde(default, alias = "verified_reports", skip_serializing_if = "Option::is_none")]
    pub verified_reports: Option<u32>,
}

impl User {
    pub fn new(id: impl Into<String>, name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: UserId::new(id),
            name: name.into(),
            email: email.into(),
            role: UserRole::default(),
            organization: None,
            location: None,
            points: 0,
            badges: Vec::new(),
            is_verified: false,
            rank: None,
            total_reports: None,
            verified_reports: None,
        }
    }
}

/// Sign-up form.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct Registration {
    pub name: String,
    pub email: String,
    pub password: Password,
    pub role: UserRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl Registration {
    pub fn new(name: impl Into<String>, email: impl Into<String>, password: Password) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            password,
            role: UserRole::Citizen,
            organization: None,
            phone: None,
            location: None,
        }
    }

    /// Local checks before the form goes on the wire.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::Empty { field: "name" });
        }
        validate_email(&self.email)?;
        if self.password.is_empty() {
            return Err(ValidationError::Empty { field: "password" });
        }
        Ok(())
    }
}

pub fn validate_email(email: &str) -> Result<(), ValidationError> {
    let email = email.trim();
    if email.is_empty() {
        return Err(ValidationError::Empty { field: "email" });
    }
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') && !domain.starts_with('.') => Ok(()),
        _ => Err(ValidationError::InvalidEmail),
    }
}

/// Persisted login: the user record plus its token.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Session {
    pub user: User,
    pub token: AuthToken,
}

// =============================================================================
// Reports
// =============================================================================

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum IncidentType {
    IllegalCutting,
    LandReclamation,
    Pollution,
    Dumping,
    RestorationOpportunity,
    HealthyMangroves,
    #[serde(other)]
    Other,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    #[default]
    Medium,
    High,
    Critical,
    #[serde(other)]
    Unknown,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    #[default]
    Pending,
    Verified,
    Rejected,
    Resolved,
    InProgress,
    #[serde(other)]
    Unknown,
}

impl fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Verified => "verified",
            Self::Rejected => "rejected",
            Self::Resolved => "resolved",
            Self::InProgress => "in_progress",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ReportLocation {
    #[serde(flatten)]
    pub coordinate: Coordinate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    #[serde(default, alias = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ReportId>,
    #[serde(default, alias = "user_id", skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    #[serde(default, alias = "reporter_name", skip_serializing_if = "Option::is_none")]
    pub reporter_name: Option<String>,
    #[serde(rename = "incidentType", alias = "incident_type", alias = "type")]
    pub incident_type: IncidentType,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub location: ReportLocation,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub status: ReportStatus,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default, alias = "estimated_area", skip_serializing_if = "Option::is_none")]
    pub estimated_area: Option<f64>,
    #[serde(default, alias = "ai_analysis", skip_serializing_if = "Option::is_none")]
    pub ai_analysis: Option<serde_json::Value>,
    #[serde(default, alias = "points_awarded")]
    pub points_awarded: u32,
    /// ISO-8601 UTC, as issued by the API.
    #[serde(default, alias = "created_at", skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

pub const MAX_TITLE_LEN: usize = 200;
pub const MAX_DESCRIPTION_LEN: usize = 4096;

impl Report {
    pub fn new(
        incident_type: IncidentType,
        title: impl Into<String>,
        description: impl Into<String>,
        coordinate: Coordinate,
    ) -> Self {
        Self {
            id: None,
            user_id: None,
            reporter_name: None,
            incident_type,
            title: title.into(),
            description: description.into(),
            location: ReportLocation {
                coordinate,
                address: None,
            },
            severity: Severity::default(),
            status: ReportStatus::default(),
            images: Vec::new(),
            estimated_area: None,
            ai_analysis: None,
            points_awarded: 0,
            created_at: None,
        }
    }

    #[must_use]
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    #[must_use]
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.location.address = Some(address.into());
        self
    }

    #[must_use]
    pub fn with_images(mut self, images: Vec<String>) -> Self {
        self.images = images;
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.title.trim().is_empty() {
            return Err(ValidationError::Empty { field: "title" });
        }
        if self.title.len() > MAX_TITLE_LEN {
            return Err(ValidationError::TooLong {
                field: "title",
                len: self.title.len(),
                max: MAX_TITLE_LEN,
            });
        }
        if self.description.len() > MAX_DESCRIPTION_LEN {
            return Err(ValidationError::TooLong {
                field: "description",
                len: self.description.len(),
                max: MAX_DESCRIPTION_LEN,
            });
        }
        Ok(())
    }
}

/// Newest first; undated reports sink to the end in their original order.
pub fn sort_newest_first(reports: &mut [Report]) {
    // ISO-8601 UTC strings from one backend compare correctly as text.
    reports.sort_by(|a, b| match (&a.created_at, &b.created_at) {
        (Some(a), Some(b)) => b.cmp(a),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    });
}

// =============================================================================
// Leaderboard
// =============================================================================

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub rank: u32,
    pub name: String,
    #[serde(default)]
    pub points: u32,
    #[serde(default, alias = "total_reports")]
    pub total_reports: u32,
    #[serde(default, alias = "verified_reports")]
    pub verified_reports: u32,
    #[serde(default)]
    pub badges: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
}

pub const BADGE_FIRST_REPORTER: &str = "First Reporter";
pub const BADGE_ACTIVE_REPORTER: &str = "Active Reporter";
pub const BADGE_SUPER_REPORTER: &str = "Super Reporter";
pub const BADGE_VERIFIED_CONTRIBUTOR: &str = "Verified Contributor";

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserStats {
    #[serde(default, alias = "total_reports")]
    pub total_reports: u32,
    #[serde(default, alias = "verified_reports")]
    pub verified_reports: u32,
    #[serde(default)]
    pub badges: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub points: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rank: Option<u32>,
}

impl UserStats {
    /// Badges the counters qualify for, in award order.
    #[must_use]
    pub fn earned_badges(&self) -> Vec<&'static str> {
        let mut badges = Vec::new();
        if self.total_reports >= 1 {
            badges.push(BADGE_FIRST_REPORTER);
        }
        if self.total_reports >= 10 {
            badges.push(BADGE_ACTIVE_REPORTER);
        }
        if self.total_reports >= 50 {
            badges.push(BADGE_SUPER_REPORTER);
        }
        if self.verified_reports >= 5 {
            badges.push(BADGE_VERIFIED_CONTRIBUTOR);
        }
        badges
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordinate_rejects_out_of_range_and_nan() {
        assert!(Coordinate::new(10.0, 20.0).is_ok());
        assert!(Coordinate::new(91.0, 0.0).is_err());
        assert!(Coordinate::new(0.0, -181.0).is_err());
        assert!(Coordinate::new(f64::NAN, 0.0).is_err());
        assert!(Coordinate::new(0.0, f64::INFINITY).is_err());
    }

    #[test]
    fn coordinate_deserialization_is_validated() {
        let ok: Coordinate = serde_json::from_str(r#"{"lat":1.5,"lng":103.8}"#).unwrap();
        assert_eq!(ok.longitude(), 103.8);
        assert!(serde_json::from_str::<Coordinate>(r#"{"latitude":100,"longitude":0}"#).is_err());
    }

    #[test]
    fn secrets_are_redacted_in_debug() {
        let token = AuthToken::new("eyJhbGciOi");
        assert_eq!(format!("{token:?}"), "[REDACTED]");
        let session = Session {
            user: User::new("u1", "Ana", "ana@example.org"),
            token,
        };
        assert!(!format!("{session:?}").contains("eyJ"));
    }

    #[test]
    fn user_accepts_mongo_style_payload() {
        let json = r#"{
            "_id": "65f0",
            "name": "Ana",
            "email": "ana@example.org",
            "role": "ngo",
            "points": 120,
            "badges": ["First Reporter"],
            "isVerified": true
        }"#;
        let user: User = serde_json::from_str(json).unwrap();
        assert_eq!(user.id.as_str(), "65f0");
        assert_eq!(user.role, UserRole::Ngo);
        assert!(user.is_verified);
        assert_eq!(user.rank, None);
    }

    #[test]
    fn unknown_tags_do_not_fail_the_record() {
        let json = r#"{
            "incidentType": "oil_spill",
            "title": "Slick near the estuary",
            "location": {"latitude": 1.0, "longitude": 2.0},
            "status": "escalated"
        }"#;
        let report: Report = serde_json::from_str(json).unwrap();
        assert_eq!(report.incident_type, IncidentType::Other);
        assert_eq!(report.status, ReportStatus::Unknown);
        assert_eq!(report.severity, Severity::Medium);
    }

    #[test]
    fn registration_validation() {
        let mut reg = Registration::new("Ana", "ana@example.org", Password::new("hunter22"));
        assert!(reg.validate().is_ok());
        reg.email = "not-an-email".into();
        assert_eq!(reg.validate(), Err(ValidationError::InvalidEmail));
        reg.email = "ana@example.org".into();
        reg.password = Password::new("");
        assert_eq!(reg.validate(), Err(ValidationError::Empty { field: "password" }));
    }

    #[test]
    fn report_title_is_bounded() {
        let coord = Coordinate::new(0.0, 0.0).unwrap();
        let report = Report::new(IncidentType::Dumping, "x".repeat(MAX_TITLE_LEN + 1), "", coord);
        assert!(matches!(report.validate(), Err(ValidationError::TooLong { field: "title", .. })));
    }

    #[test]
    fn built_report_serializes_in_wire_shape() {
        let coord = Coordinate::new(-2.17, 40.9).unwrap();
        let report = Report::new(IncidentType::Pollution, "Oil sheen", "slick along the creek", coord)
            .with_severity(Severity::High)
            .with_address("Mida Creek, Kilifi")
            .with_images(vec!["uploads/oil-1.jpg".into()]);

        assert!(report.validate().is_ok());
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["incidentType"], "pollution");
        assert_eq!(json["severity"], "high");
        assert_eq!(json["location"]["latitude"], -2.17);
        assert_eq!(json["location"]["address"], "Mida Creek, Kilifi");
        assert_eq!(json["images"], serde_json::json!(["uploads/oil-1.jpg"]));
        assert!(json.get("id").is_none());
    }

    #[test]
    fn reports_sort_newest_first() {
        let coord = Coordinate::new(0.0, 0.0).unwrap();
        let mk = |title: &str, at: Option<&str>| {
            let mut r = Report::new(IncidentType::Pollution, title, "", coord);
            r.created_at = at.map(str::to_owned);
            r
        };
        let mut reports = vec![
            mk("old", Some("2024-01-01T00:00:00Z")),
            mk("undated", None),
            mk("new", Some("2024-03-01T00:00:00Z")),
        ];
        sort_newest_first(&mut reports);
        let titles: Vec<_> = reports.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, ["new", "old", "undated"]);
    }

    #[test]
    fn badge_thresholds() {
        let stats = UserStats {
            total_reports: 10,
            verified_reports: 5,
            ..UserStats::default()
        };
        assert_eq!(
            stats.earned_badges(),
            [BADGE_FIRST_REPORTER, BADGE_ACTIVE_REPORTER, BADGE_VERIFIED_CONTRIBUTOR]
        );
        assert!(UserStats::default().earned_badges().is_empty());
    }
}
