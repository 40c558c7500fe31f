//! Login risk scoring
//!
//! [`score`] is a pure function over the history gathered by the attempt recorder.
//! Each signal adds a fixed weight and the total is clamped to [0, 1].

use std::collections::HashSet;

use crate::{attempt::LoginAttempt, session::browser_family};

pub const UNKNOWN_USER_WEIGHT: f64 = 0.3;
pub const NEW_IP_WEIGHT: f64 = 0.4;
pub const NEW_BROWSER_WEIGHT: f64 = 0.2;
pub const RECENT_FAILURES_WEIGHT: f64 = 0.3;
pub const HIGH_IP_VELOCITY_WEIGHT: f64 = 0.4;

/// Failed attempts within the window that start to count as a signal.
pub const RECENT_FAILURES_THRESHOLD: usize = 3;
/// Attempts from one IP in the last hour above which the IP is considered noisy.
pub const IP_VELOCITY_THRESHOLD: usize = 10;

/// Score reported when the history needed for scoring could not be loaded.
pub const NEUTRAL_SCORE: f64 = 0.5;

/// What the scorer knows about the user behind an attempt.
#[derive(Debug, Clone)]
pub enum UserHistory<'a> {
    /// The identifier did not resolve to a user.
    Unknown,
    Known {
        /// The user's successful attempts in the last 30 days.
        successful_attempts: &'a [LoginAttempt],
        /// The user's failed attempts within the configured failure window.
        recent_failures: usize,
    },
}

#[derive(Debug, Clone)]
pub struct RiskInputs<'a> {
    pub ip_address: &'a str,
    pub user_agent: Option<&'a str>,
    pub history: UserHistory<'a>,
    /// Attempts of any outcome from `ip_address` in the last hour.
    pub ip_attempts_last_hour: usize,
}

pub fn score(inputs: &RiskInputs<'_>) -> f64 {
    let mut score = 0.0;

    match &inputs.history {
        UserHistory::Unknown => score += UNKNOWN_USER_WEIGHT,
        UserHistory::Known {
            successful_attempts,
            recent_failures,
        } => {
            let known_ips: HashSet<&str> = successful_attempts
                .iter()
                .map(|a| a.ip_address.as_str())
                .collect();
            if !known_ips.contains(inputs.ip_address) {
                score += NEW_IP_WEIGHT;
            }

            if let Some(user_agent) = inputs.user_agent {
                let family = browser_family(user_agent);
                let seen = successful_attempts
                    .iter()
                    .filter_map(|a| a.user_agent.as_deref())
                    .any(|ua| browser_family(ua) == family);
                if !seen {
                    score += NEW_BROWSER_WEIGHT;
                }
            }

            if *recent_failures >= RECENT_FAILURES_THRESHOLD {
                score += RECENT_FAILURES_WEIGHT;
            }
        }
    }

    if inputs.ip_attempts_last_hour > IP_VELOCITY_THRESHOLD {
        score += HIGH_IP_VELOCITY_WEIGHT;
    }

    clamp_score(score)
}

pub fn clamp_score(score: f64) -> f64 {
    if score.is_nan() {
        return NEUTRAL_SCORE;
    }
    score.clamp(0.0, 1.0)
}

/// The score to use when scoring itself failed.
pub fn or_neutral<E>(result: Result<f64, E>) -> f64 {
    result.map(clamp_score).unwrap_or(NEUTRAL_SCORE)
}

pub fn is_suspicious(score: f64, threshold: f64) -> bool {
    score >= threshold
}
