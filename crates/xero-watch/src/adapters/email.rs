//! SMTP notifier.
//!
//! Mail is sent from `<node>@<smtp_from_domain>` so every node gets its own
//! thread in the operators' inbox. Delivery failures are reported to the
//! caller, which only logs them.

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::time::Duration;
use tracing::info;

use super::meme::{caption, MemeAssets, MemeImage, MEME_CID};
use super::{Notification, Notifier};
use crate::config::{EmailConfig, MemeConfig};
use crate::errors::AdapterError;

const SMTP_TIMEOUT: Duration = Duration::from_secs(30);

pub struct SmtpNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from_domain: String,
    recipients: Vec<Mailbox>,
    memes: Option<MemeAssets>,
}

impl SmtpNotifier {
    pub fn new(email: &EmailConfig, meme: &MemeConfig) -> Result<Self, AdapterError> {
        let recipients = email
            .smtp_recipients
            .iter()
            .map(|r| {
                r.parse::<Mailbox>()
                    .map_err(|e| AdapterError::Notification(format!("bad recipient {r:?}: {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let builder = if email.starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(email.smtp_server.as_str())
                .map_err(|e| AdapterError::Notification(format!("STARTTLS setup: {e}")))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(email.smtp_server.as_str())
        };
        let mut builder = builder.port(email.smtp_port).timeout(Some(SMTP_TIMEOUT));
        if !email.smtp_username.is_empty() {
            builder = builder.credentials(Credentials::new(
                email.smtp_username.clone(),
                email.smtp_password.clone(),
            ));
        }

        Ok(Self {
            transport: builder.build(),
            from_domain: email.smtp_from_domain.clone(),
            recipients,
            memes: MemeAssets::from_config(meme),
        })
    }

    pub fn sender(&self, node: &str) -> Result<Mailbox, AdapterError> {
        format!("{node}@{}", self.from_domain)
            .parse()
            .map_err(|e| AdapterError::Notification(format!("bad sender for {node}: {e}")))
    }

    pub fn build_message(
        &self,
        notification: &Notification,
        image: Option<MemeImage>,
    ) -> Result<Message, AdapterError> {
        let mut builder = Message::builder()
            .from(self.sender(&notification.node)?)
            .subject(notification.subject.as_str());
        for recipient in &self.recipients {
            builder = builder.to(recipient.clone());
        }

        let built = match (image, notification.meme, &self.memes) {
            (Some(image), Some(kind), Some(assets)) => {
                let html = assets
                    .render_html(&notification.body, &caption(kind, &notification.node))
                    .map_err(|e| AdapterError::Notification(format!("meme template: {e}")))?;
                let content_type = ContentType::parse(image.content_type)
                    .map_err(|e| AdapterError::Notification(e.to_string()))?;
                builder.multipart(
                    MultiPart::alternative()
                        .singlepart(SinglePart::plain(notification.body.clone()))
                        .multipart(
                            MultiPart::related()
                                .singlepart(SinglePart::html(html))
                                .singlepart(
                                    Attachment::new_inline(MEME_CID.to_string())
                                        .body(image.bytes, content_type),
                                ),
                        ),
                )
            }
            _ => builder
                .header(ContentType::TEXT_PLAIN)
                .body(notification.body.clone()),
        };
        built.map_err(|e| AdapterError::Notification(e.to_string()))
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), AdapterError> {
        let image = match (notification.meme, &self.memes) {
            (Some(kind), Some(assets)) => assets.load(kind).await,
            _ => None,
        };
        let message = self.build_message(notification, image)?;

        self.transport
            .send(message)
            .await
            .map_err(|e| AdapterError::Notification(e.to_string()))?;
        info!(
            node = %notification.node,
            subject = %notification.subject,
            recipients = self.recipients.len(),
            "notification sent"
        );
        Ok(())
    }
}
