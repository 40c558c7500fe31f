//! Outbound email
//!
//! Services only see the [`EmailSender`] trait. Delivery failures come back as
//! [`DeliveryError`] and callers decide whether they matter. Email OTP delivery
//! reports them while security alerts log and continue.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::DeliveryError;

/// Template carrying an email one-time password.
pub const MFA_OTP_TEMPLATE: &str = "mfa-otp";

#[async_trait]
pub trait EmailSender: Send + Sync + 'static {
    async fn send_email(
        &self,
        to: &str,
        subject: &str,
        body: &str,
        is_html: bool,
    ) -> Result<(), DeliveryError>;

    async fn send_templated_email(
        &self,
        to: &str,
        template: &str,
        data: &HashMap<String, String>,
    ) -> Result<(), DeliveryError>;
}

/// Development sender that logs messages instead of delivering them.
///
/// Template values are never logged, only their keys, since they carry codes.
#[derive(Debug, Clone, Default)]
pub struct TracingEmailSender;

#[async_trait]
impl EmailSender for TracingEmailSender {
    async fn send_email(
        &self,
        to: &str,
        subject: &str,
        body: &str,
        is_html: bool,
    ) -> Result<(), DeliveryError> {
        tracing::info!(
            to,
            subject,
            is_html,
            body_len = body.len(),
            "Email not delivered (tracing sender)"
        );
        Ok(())
    }

    async fn send_templated_email(
        &self,
        to: &str,
        template: &str,
        data: &HashMap<String, String>,
    ) -> Result<(), DeliveryError> {
        let mut keys: Vec<&str> = data.keys().map(String::as_str).collect();
        keys.sort_unstable();
        tracing::info!(
            to,
            template,
            keys = ?keys,
            "Templated email not delivered (tracing sender)"
        );
        Ok(())
    }
}

/// A message captured by [`MemoryEmailSender`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentEmail {
    Message {
        to: String,
        subject: String,
        body: String,
        is_html: bool,
    },
    Templated {
        to: String,
        template: String,
        data: HashMap<String, String>,
    },
}

impl SentEmail {
    pub fn to(&self) -> &str {
        match self {
            SentEmail::Message { to, .. } | SentEmail::Templated { to, .. } => to,
        }
    }
}

/// Keeps every message in an in-process outbox. Clones share the outbox.
///
/// Can be switched into a failing mode to exercise delivery error paths.
#[derive(Debug, Clone, Default)]
pub struct MemoryEmailSender {
    outbox: Arc<Mutex<Vec<SentEmail>>>,
    failing: Arc<AtomicBool>,
}

impl MemoryEmailSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following send fail with [`DeliveryError::Failed`].
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub async fn sent(&self) -> Vec<SentEmail> {
        self.outbox.lock().await.clone()
    }

    /// Data of the most recent templated email sent with `template` to `to`.
    pub async fn last_templated(&self, to: &str, template: &str) -> Option<HashMap<String, String>> {
        self.outbox
            .lock()
            .await
            .iter()
            .rev()
            .find_map(|email| match email {
                SentEmail::Templated {
                    to: recipient,
                    template: name,
                    data,
                } if recipient == to && name == template => Some(data.clone()),
                _ => None,
            })
    }

    fn check_failing(&self) -> Result<(), DeliveryError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(DeliveryError::Failed("outbox is in failing mode".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl EmailSender for MemoryEmailSender {
    async fn send_email(
        &self,
        to: &str,
        subject: &str,
        body: &str,
        is_html: bool,
    ) -> Result<(), DeliveryError> {
        self.check_failing()?;
        self.outbox.lock().await.push(SentEmail::Message {
            to: to.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
            is_html,
        });
        Ok(())
    }

    async fn send_templated_email(
        &self,
        to: &str,
        template: &str,
        data: &HashMap<String, String>,
    ) -> Result<(), DeliveryError> {
        self.check_failing()?;
        self.outbox.lock().await.push(SentEmail::Templated {
            to: to.to_string(),
            template: template.to_string(),
            data: data.clone(),
        });
        Ok(())
    }
}
