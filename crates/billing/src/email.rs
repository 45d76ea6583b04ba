//! Email notifications for billing events
//!
//! Sends transactional emails via Resend API for billing-related events.
//! Delivery is fire-and-forget: failures return `Ok(false)` and are logged,
//! never propagated into webhook or user-action results.

use async_trait::async_trait;

use crate::error::BillingResult;

/// A billing notification to deliver
#[derive(Debug, Clone)]
pub enum NotificationTemplate {
    SubscriptionActivated { tier: String },
    SubscriptionCancelled { tier: String },
    CancellationScheduled,
    PaymentReceived { amount: String, currency: String },
    PaymentFailed,
    RefundIssued { amount: String, currency: String },
}

/// Outbound notification collaborator
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BillingNotifier: Send + Sync {
    /// Deliver a notification; `Ok(false)` means delivery failed non-fatally
    async fn send(&self, recipient: &str, template: NotificationTemplate) -> BillingResult<bool>;
}

/// Email configuration
#[derive(Debug, Clone)]
pub struct EmailConfig {
    /// Resend API key
    pub resend_api_key: String,
    /// From address for emails
    pub email_from: String,
    /// App name for branding
    pub app_name: String,
    /// Dashboard URL
    pub dashboard_url: String,
}

impl EmailConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        Self {
            resend_api_key: std::env::var("RESEND_API_KEY").unwrap_or_default(),
            email_from: std::env::var("EMAIL_FROM")
                .unwrap_or_else(|_| "MeetNotes <noreply@meetnotes.app>".to_string()),
            app_name: std::env::var("APP_NAME").unwrap_or_else(|_| "MeetNotes".to_string()),
            dashboard_url: std::env::var("PUBLIC_URL")
                .unwrap_or_else(|_| "https://meetnotes.app".to_string()),
        }
    }

    /// Check if email sending is enabled
    pub fn is_enabled(&self) -> bool {
        !self.resend_api_key.is_empty()
    }
}

/// Billing email notification service
#[derive(Clone)]
pub struct BillingEmailService {
    config: EmailConfig,
    client: reqwest::Client,
}

impl BillingEmailService {
    /// Create a new email service
    pub fn new(config: EmailConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    /// Create from environment variables
    pub fn from_env() -> Self {
        Self::new(EmailConfig::from_env())
    }

    /// Send an email via Resend API
    ///
    /// Returns `Ok(true)` if the email was sent successfully,
    /// `Ok(false)` if sending failed (non-fatal - doesn't propagate error).
    async fn send_email(&self, to: &str, subject: &str, html: &str) -> BillingResult<bool> {
        if !self.config.is_enabled() {
            tracing::warn!(
                to = %to,
                subject = %subject,
                "Email not configured, skipping"
            );
            return Ok(false);
        }

        let body = serde_json::json!({
            "from": self.config.email_from,
            "to": [to],
            "subject": subject,
            "html": html
        });

        let response = self
            .client
            .post("https://api.resend.com/emails")
            .header(
                "Authorization",
                format!("Bearer {}", self.config.resend_api_key),
            )
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => {
                tracing::info!(to = %to, subject = %subject, "Billing email sent");
                Ok(true)
            }
            Ok(resp) => {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                tracing::error!(
                    to = %to,
                    subject = %subject,
                    status = %status,
                    body = %body,
                    "Failed to send billing email - non-fatal"
                );
                Ok(false)
            }
            Err(e) => {
                tracing::error!(
                    to = %to,
                    subject = %subject,
                    error = %e,
                    "Failed to send billing email - non-fatal"
                );
                Ok(false)
            }
        }
    }

    fn wrap(&self, heading: &str, heading_color: &str, body: &str) -> String {
        format!(
            r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"></head>
<body style="font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; line-height: 1.6; color: #333; max-width: 600px; margin: 0 auto; padding: 20px;">
    <h2 style="color: {heading_color};">{heading}</h2>
    {body}
    <p style="color: #888; font-size: 13px;">— The {app} team</p>
</body>
</html>"#,
            heading_color = heading_color,
            heading = heading,
            body = body,
            app = self.config.app_name,
        )
    }
}

#[async_trait]
impl BillingNotifier for BillingEmailService {
    async fn send(&self, recipient: &str, template: NotificationTemplate) -> BillingResult<bool> {
        let billing_link = format!("{}/settings/billing", self.config.dashboard_url);

        let (subject, html) = match template {
            NotificationTemplate::SubscriptionActivated { tier } => (
                format!("Your {} subscription is active", self.config.app_name),
                self.wrap(
                    "Subscription Active",
                    "#16a34a",
                    &format!(
                        "<p>Your <strong>{}</strong> plan is now active. Enjoy your upgraded \
                         transcription and summary limits.</p>\
                         <p><a href=\"{}\" style=\"color: #6366f1;\">Manage your subscription</a></p>",
                        tier, billing_link
                    ),
                ),
            ),
            NotificationTemplate::SubscriptionCancelled { tier } => (
                "Your subscription has ended".to_string(),
                self.wrap(
                    "Subscription Ended",
                    "#dc2626",
                    &format!(
                        "<p>Your <strong>{}</strong> subscription has ended and your account \
                         is back on the free plan. Your notes are untouched.</p>\
                         <p><a href=\"{}\" style=\"color: #6366f1;\">Resubscribe</a></p>",
                        tier, billing_link
                    ),
                ),
            ),
            NotificationTemplate::CancellationScheduled => (
                "Cancellation scheduled".to_string(),
                self.wrap(
                    "Cancellation Scheduled",
                    "#d97706",
                    &format!(
                        "<p>Your subscription will end at the close of the current billing \
                         period. You keep full access until then.</p>\
                         <p><a href=\"{}\" style=\"color: #6366f1;\">Changed your mind?</a></p>",
                        billing_link
                    ),
                ),
            ),
            NotificationTemplate::PaymentReceived { amount, currency } => (
                "Payment received".to_string(),
                self.wrap(
                    "Payment Received",
                    "#16a34a",
                    &format!(
                        "<p>We received your payment of <strong>{} {}</strong>. Thank you!</p>",
                        amount, currency
                    ),
                ),
            ),
            NotificationTemplate::PaymentFailed => (
                "Payment failed".to_string(),
                self.wrap(
                    "Payment Failed",
                    "#dc2626",
                    &format!(
                        "<p>We weren't able to process your subscription payment. Please check \
                         your payment method with PayPal to avoid interruption.</p>\
                         <p><a href=\"{}\" style=\"color: #6366f1;\">Billing settings</a></p>",
                        billing_link
                    ),
                ),
            ),
            NotificationTemplate::RefundIssued { amount, currency } => (
                "Refund issued".to_string(),
                self.wrap(
                    "Refund Issued",
                    "#16a34a",
                    &format!(
                        "<p>A refund of <strong>{} {}</strong> has been issued to your \
                         payment method. It may take a few days to appear.</p>",
                        amount, currency
                    ),
                ),
            ),
        };

        self.send_email(recipient, &subject, &html).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disabled_config_skips_send() {
        let service = BillingEmailService::new(EmailConfig {
            resend_api_key: String::new(),
            email_from: "MeetNotes <noreply@meetnotes.app>".to_string(),
            app_name: "MeetNotes".to_string(),
            dashboard_url: "https://meetnotes.app".to_string(),
        });

        let sent = service
            .send(
                "user@example.com",
                NotificationTemplate::PaymentFailed,
            )
            .await
            .unwrap();
        assert!(!sent);
    }
}
