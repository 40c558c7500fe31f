//! Session records
//!
//! A session is created on successful login and tracks the device it came from:
//!
//! | Field              | Type             | Description                                                  |
//! | ------------------ | ---------------- | ------------------------------------------------------------ |
//! | `id`               | `SessionId`      | The unique identifier for the session.                       |
//! | `user_id`          | `UserId`         | The owning user.                                             |
//! | `session_token`    | `String`         | The access token bound to this session.                      |
//! | `refresh_token`    | `String`         | The opaque refresh token bound to this session.              |
//! | `ip_address`       | `String`         | The IP address of the client that created the session.       |
//! | `operating_system` | `String`         | Parsed from the user agent.                                  |
//! | `browser`          | `String`         | Parsed from the user agent.                                  |
//! | `location`         | `String`         | Free-form "City, Region, Country", or `Unknown`.             |
//! | `is_active`        | `bool`           | Cleared on logout, eviction, or bulk revoke.                 |
//! | `expires_at`       | `DateTime`       | Slides forward on activity.                                  |
//! | `last_accessed_at` | `Option<DateTime>` | When the session was last used.                            |

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{SessionId, UserId};

/// Location recorded when the caller could not resolve one.
pub const UNKNOWN_LOCATION: &str = "Unknown";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub user_id: UserId,
    pub session_token: String,
    pub refresh_token: String,
    pub ip_address: String,
    pub user_agent: Option<String>,
    pub device_type: DeviceType,
    pub operating_system: String,
    pub browser: String,
    pub location: String,
    pub device_info: Option<String>,
    pub is_active: bool,
    pub is_suspicious: bool,
    pub expires_at: DateTime<Utc>,
    pub last_accessed_at: Option<DateTime<Utc>>,
    pub terminated_at: Option<DateTime<Utc>>,
    pub termination_reason: Option<TerminationReason>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Active and not past its expiry.
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.expires_at > now
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Ordering key for eviction: least recently used first.
    pub fn last_seen(&self) -> DateTime<Utc> {
        self.last_accessed_at.unwrap_or(self.created_at)
    }

    /// Country component of a "City, Region, Country" location.
    pub fn country(&self) -> Option<&str> {
        location_country(&self.location)
    }

    /// 100 minus 10 per whole day since last use, clamped to [0, 100].
    pub fn activity_score_at(&self, now: DateTime<Utc>) -> u8 {
        let days_inactive = (now - self.last_seen()).num_days().max(0);
        (100 - 10 * days_inactive).clamp(0, 100) as u8
    }
}

pub(crate) fn location_country(location: &str) -> Option<&str> {
    if location.is_empty() || location == UNKNOWN_LOCATION {
        return None;
    }
    location
        .rsplit(',')
        .next()
        .map(str::trim)
        .filter(|country| !country.is_empty())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    Logout,
    /// Evicted to stay within the concurrent session limit.
    ConcurrentLimit,
    TerminatedByUser,
    RevokedAll,
    SecurityIncident,
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceType {
    Desktop,
    Mobile,
    Tablet,
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceType::Desktop => write!(f, "Desktop"),
            DeviceType::Mobile => write!(f, "Mobile"),
            DeviceType::Tablet => write!(f, "Tablet"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub device_type: DeviceType,
    pub operating_system: String,
    pub browser: String,
}

impl DeviceInfo {
    /// Heuristic user-agent parse. Unrecognised parts become `Unknown`.
    pub fn parse(user_agent: Option<&str>) -> Self {
        let Some(ua) = user_agent.map(str::to_lowercase) else {
            return Self {
                device_type: DeviceType::Desktop,
                operating_system: "Unknown".to_string(),
                browser: "Unknown".to_string(),
            };
        };

        let device_type = if ua.contains("ipad") || ua.contains("tablet") {
            DeviceType::Tablet
        } else if ua.contains("mobile") || ua.contains("android") || ua.contains("iphone") {
            DeviceType::Mobile
        } else {
            DeviceType::Desktop
        };

        let operating_system = if ua.contains("windows") {
            "Windows"
        } else if ua.contains("android") {
            "Android"
        } else if ua.contains("iphone") || ua.contains("ipad") || ua.contains("ios") {
            "iOS"
        } else if ua.contains("mac") {
            "macOS"
        } else if ua.contains("linux") {
            "Linux"
        } else {
            "Unknown"
        };

        Self {
            device_type,
            operating_system: operating_system.to_string(),
            browser: browser_family(&ua).to_string(),
        }
    }

    pub fn label(&self) -> String {
        format!(
            "{} {} on {}",
            self.device_type, self.browser, self.operating_system
        )
    }
}

/// Browser family of a user agent: Edge, Chrome, Firefox, Safari or Other.
pub fn browser_family(user_agent: &str) -> &'static str {
    let ua = user_agent.to_lowercase();
    if ua.contains("edg/") || ua.contains("edge") {
        "Edge"
    } else if ua.contains("firefox") {
        "Firefox"
    } else if ua.contains("chrome") || ua.contains("crios") {
        "Chrome"
    } else if ua.contains("safari") {
        "Safari"
    } else {
        "Other"
    }
}

/// Input to [`SessionManager::create_session`](crate::services::SessionManager::create_session).
#[derive(Debug, Clone, Default)]
pub struct NewSession {
    pub user_id: UserId,
    pub session_token: String,
    pub refresh_token: String,
    pub ip_address: String,
    pub user_agent: Option<String>,
    pub device_info: Option<String>,
    pub location: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CreatedSession {
    pub session: Session,
    pub terminated_sessions: Vec<Session>,
    pub suspicious: bool,
}

/// Dashboard view of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: SessionId,
    pub device: String,
    pub ip_address: String,
    pub location: String,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    pub is_current: bool,
    pub is_suspicious: bool,
    pub activity_score: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionStatistics {
    pub total_sessions: usize,
    pub active_sessions: usize,
    pub expired_sessions: usize,
    pub suspicious_sessions: usize,
    pub last_login_at: Option<DateTime<Utc>>,
    pub last_login_location: Option<String>,
    pub last_login_device: Option<String>,
    pub recent_locations: Vec<String>,
    pub recent_devices: Vec<String>,
    pub sessions_by_location: HashMap<String, usize>,
    pub sessions_by_device: HashMap<String, usize>,
}
