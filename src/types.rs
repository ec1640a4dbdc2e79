// ABOUTME: Type definitions for API requests, responses, and internal data structures
// ABOUTME: Includes the opaque ID scheme, stored models, and the closed updatable-field set

use crate::error::{AppError, Result};
use chrono::NaiveDate;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque 24-character lowercase hex identifier. Entry points validate the
/// fixed length before any lookup happens.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(String);

impl ObjectId {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut bytes);
        let mut s = String::with_capacity(24);
        for b in bytes {
            s.push_str(&format!("{:02x}", b));
        }
        Self(s)
    }

    pub fn parse(raw: &str) -> Result<Self> {
        if raw.len() == 24 && raw.chars().all(|c| c.is_ascii_hexdigit()) {
            Ok(Self(raw.to_lowercase()))
        } else {
            Err(AppError::Validation(format!(
                "invalid identifier: {}",
                raw
            )))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// Stored models

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: ObjectId,
    pub username: String,
    pub email: String,
    pub display_name: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub email_confirmed: bool,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Profile {
    pub id: ObjectId,
    pub name: String,
    pub gender: String,
    pub birth_date: NaiveDate,
    pub birth_place: String,
    pub death_date: NaiveDate,
    pub death_place: String,
    pub biography: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relation {
    pub id: ObjectId,
    pub first_id: ObjectId,
    pub second_id: ObjectId,
    pub first_to_second: String,
    pub second_to_first: String,
}

/// Closed set of profile attributes reachable through the single-field patch
/// endpoint. Parsing the raw field/value pair happens here, at the boundary, so
/// the storage layer never coerces types.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdatableField {
    Name(String),
    Gender(String),
    BirthDate(NaiveDate),
    BirthPlace(String),
    DeathDate(NaiveDate),
    DeathPlace(String),
    Biography(String),
}

impl UpdatableField {
    pub fn parse(field: &str, value: &str) -> Result<Self> {
        let parse_date = |v: &str| -> Result<NaiveDate> {
            NaiveDate::parse_from_str(v, "%Y-%m-%d")
                .map_err(|_| AppError::Validation(format!("'{}' is not a date (YYYY-MM-DD)", v)))
        };

        match field {
            "name" => Ok(Self::Name(value.to_string())),
            "gender" => Ok(Self::Gender(value.to_string())),
            "birth_date" => Ok(Self::BirthDate(parse_date(value)?)),
            "birth_place" => Ok(Self::BirthPlace(value.to_string())),
            "death_date" => Ok(Self::DeathDate(parse_date(value)?)),
            "death_place" => Ok(Self::DeathPlace(value.to_string())),
            "biography" => Ok(Self::Biography(value.to_string())),
            other => Err(AppError::Validation(format!(
                "'{}' is not an updatable field",
                other
            ))),
        }
    }

    pub fn column(&self) -> &'static str {
        match self {
            Self::Name(_) => "name",
            Self::Gender(_) => "gender",
            Self::BirthDate(_) => "birth_date",
            Self::BirthPlace(_) => "birth_place",
            Self::DeathDate(_) => "death_date",
            Self::DeathPlace(_) => "death_place",
            Self::Biography(_) => "biography",
        }
    }

    pub fn value_text(&self) -> String {
        match self {
            Self::Name(v)
            | Self::Gender(v)
            | Self::BirthPlace(v)
            | Self::DeathPlace(v)
            | Self::Biography(v) => v.clone(),
            Self::BirthDate(d) | Self::DeathDate(d) => d.to_string(),
        }
    }
}

// Auth API types

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub display_name: String,
    pub email: String,
    pub password: String,
    #[serde(default = "default_role")]
    pub role: String,
    #[serde(default)]
    pub skip_email_verification: bool,
}

fn default_role() -> String {
    "comun".to_string()
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub token: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UserView {
    pub id: ObjectId,
    pub username: String,
    pub email: String,
    pub display_name: String,
    pub email_confirmed: bool,
    pub created_at: i64,
    pub roles: Vec<String>,
    pub profile_ids: Vec<ObjectId>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateUserRequest {
    pub display_name: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ResetPasswordRequest {
    pub token: String,
    pub new_password: String,
}

// Profile API types

#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateFieldRequest {
    pub field: String,
    pub value: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProfileView {
    pub id: ObjectId,
    pub name: String,
    pub gender: String,
    pub birth_date: NaiveDate,
    pub birth_place: String,
    pub death_date: NaiveDate,
    pub death_place: String,
    pub biography: String,
    pub image_url: Option<String>,
    pub qr_url: Option<String>,
    pub gallery_files: Vec<String>,
    pub audio_files: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProfileSummary {
    pub id: ObjectId,
    pub name: String,
    pub death_date: NaiveDate,
    pub image_url: Option<String>,
    pub qr_url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SearchMatch {
    pub id: ObjectId,
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<SearchMatch>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ImageUpdatedResponse {
    pub message: String,
    pub image_url: String,
}

// Relation API types

#[derive(Debug, Serialize, Deserialize)]
pub struct RelationRequest {
    pub first_id: ObjectId,
    pub second_id: ObjectId,
    pub first_to_second: String,
    pub second_to_first: String,
}

/// One edge as seen from the profile that was queried: the label facing that
/// profile plus a summary of whoever sits on the other end.
#[derive(Debug, Serialize, Deserialize)]
pub struct RelationView {
    pub id: ObjectId,
    pub label: String,
    pub related: Option<RelatedProfile>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RelatedProfile {
    pub id: ObjectId,
    pub name: String,
    pub gender: String,
    pub death_date: NaiveDate,
    pub image_url: Option<String>,
}
