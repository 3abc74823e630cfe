//! Report data model.
use std::{collections::BTreeSet, fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Fallback municipality label used when reverse geocoding is unavailable.
pub const UNIDENTIFIED: &str = "unidentified";

/// Mean Earth radius in meters, used for great-circle distances.
const EARTH_RADIUS_M: f64 = 6_371_000.0;

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
/// The closed set of report categories.
pub enum Category {
    Emergency,
    Help,
    #[serde(rename = "Road Hazard")]
    RoadHazard,
    #[serde(rename = "Public Service")]
    PublicService,
    #[serde(rename = "Blood Donation")]
    BloodDonation,
    #[serde(rename = "Community Notice")]
    CommunityNotice,
    #[serde(rename = "Social Event")]
    SocialEvent,
    #[serde(rename = "Lost Pet")]
    LostPet,
    #[serde(rename = "Missing Person")]
    MissingPerson,
    #[serde(rename = "Traffic Incident")]
    TrafficIncident,
    #[serde(rename = "Electrical Failure")]
    ElectricalFailure,
    #[serde(rename = "Water Leak")]
    WaterLeak,
    #[default]
    Other,
}

impl Category {
    /// Every category, in declaration order.
    pub const ALL: [Self; 13] = [
        Self::Emergency,
        Self::Help,
        Self::RoadHazard,
        Self::PublicService,
        Self::BloodDonation,
        Self::CommunityNotice,
        Self::SocialEvent,
        Self::LostPet,
        Self::MissingPerson,
        Self::TrafficIncident,
        Self::ElectricalFailure,
        Self::WaterLeak,
        Self::Other,
    ];

    /// The wire and storage label.
    pub const fn label(self) -> &'static str {
        match self {
            Self::Emergency => "Emergency",
            Self::Help => "Help",
            Self::RoadHazard => "Road Hazard",
            Self::PublicService => "Public Service",
            Self::BloodDonation => "Blood Donation",
            Self::CommunityNotice => "Community Notice",
            Self::SocialEvent => "Social Event",
            Self::LostPet => "Lost Pet",
            Self::MissingPerson => "Missing Person",
            Self::TrafficIncident => "Traffic Incident",
            Self::ElectricalFailure => "Electrical Failure",
            Self::WaterLeak => "Water Leak",
            Self::Other => "Other",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown category {0:?}")]
pub struct UnknownCategory(pub String);

impl FromStr for Category {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.label() == s)
            .ok_or_else(|| UnknownCategory(s.to_owned()))
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
/// Report status. `Resolved` and `Verified` are terminal.
pub enum Status {
    #[default]
    Active,
    Resolved,
    Verified,
}

impl Status {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Resolved => "resolved",
            Self::Verified => "verified",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "resolved" => Ok(Self::Resolved),
            "verified" => Ok(Self::Verified),
            _ => anyhow::bail!("unknown status {s:?}"),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// An identified person performing an action, normalized at the auth boundary.
pub struct Actor {
    pub id: String,
    pub display_name: String,
    pub role: Role,
}

impl Actor {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
/// A WGS84 point.
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinates {
    /// Validate a raw `[lat, lng]` pair.
    pub fn from_pair(raw: &[f64]) -> Option<Self> {
        match *raw {
            [lat, lng] => {
                let c = Self { lat, lng };
                c.is_valid().then_some(c)
            }
            _ => None,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }

    /// Great-circle (haversine) distance in meters.
    pub fn distance_to(&self, other: &Self) -> f64 {
        let lat1 = self.lat.to_radians();
        let lat2 = other.lat.to_radians();
        let d_lat = (other.lat - self.lat).to_radians();
        let d_lng = (other.lng - self.lng).to_radians();

        let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lng / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
        EARTH_RADIUS_M * c
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// A geolocated incident report.
pub struct Report {
    pub id: String,
    pub description: String,
    pub category: Category,
    pub location: Coordinates,
    pub municipality: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_ref: Option<String>,
    pub created_by: String,
    #[serde(default)]
    pub confirmed_by: BTreeSet<String>,
    #[serde(default)]
    pub flagged_by: BTreeSet<String>,
    pub status: Status,
    pub priority: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Incremented by every accepted mutation.
    #[serde(default)]
    pub version: i64,
}

impl Report {
    pub fn confirmation_count(&self) -> usize {
        self.confirmed_by.len()
    }

    pub fn flag_count(&self) -> usize {
        self.flagged_by.len()
    }

    /// Whether the report has outlived its category TTL at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Strip data only administrators may see.
    #[must_use]
    pub fn redacted_for(mut self, viewer: Option<&Actor>) -> Self {
        if !viewer.is_some_and(Actor::is_admin) {
            self.flagged_by.clear();
        }
        self
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
/// Server-side list filter.
pub struct ReportFilter {
    pub status: Option<Status>,
    pub category: Option<Category>,
    pub municipality: Option<String>,
}

impl ReportFilter {
    pub fn matches(&self, report: &Report) -> bool {
        self.status.map_or(true, |s| s == report.status)
            && self.category.map_or(true, |c| c == report.category)
            && self
                .municipality
                .as_deref()
                .map_or(true, |m| report.municipality.as_deref() == Some(m))
    }
}
