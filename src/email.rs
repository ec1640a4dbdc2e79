// ABOUTME: Email collaborator seam for verification and password-reset messages
// ABOUTME: The core only builds links and bodies; delivery lives behind the trait

use crate::error::Result;
use async_trait::async_trait;

#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, to: &str, subject: &str, html_body: &str) -> Result<()>;
}

/// Default collaborator: logs the message instead of delivering it. Deployments
/// wire a real transport behind the same trait.
pub struct LogMailer;

#[async_trait]
impl EmailSender for LogMailer {
    async fn send(&self, to: &str, subject: &str, html_body: &str) -> Result<()> {
        tracing::info!(to, subject, body = html_body, "outbound email");
        Ok(())
    }
}

pub fn verification_body(link: &str) -> String {
    format!(
        "<html><body><p>Please confirm your account by clicking this link: \
         <a href='{link}'>Verify email</a></p></body></html>"
    )
}

pub fn password_reset_body(link: &str) -> String {
    format!(
        "<html><body><p>To reset your password, click here: \
         <a href='{link}'>Reset password</a></p></body></html>"
    )
}
