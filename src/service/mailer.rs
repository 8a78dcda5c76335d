use crate::config::EmailConfig;
use crate::error::LecternError;
use serde::Serialize;
use std::time::Duration;
use tracing::info;
use url::Url;

#[derive(Debug, Serialize)]
struct OutgoingEmail<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    html: String,
    text: String,
}

/// Sends sign-in links through the transactional email API.
#[derive(Clone)]
pub struct Mailer {
    http: reqwest::Client,
    api_url: Url,
    api_key: Option<String>,
    from: String,
}

impl Mailer {
    pub fn new(cfg: &EmailConfig) -> Result<Self, LecternError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self {
            http,
            api_url: cfg.api_url.clone(),
            api_key: cfg.api_key.clone().filter(|k| !k.is_empty()),
            from: cfg.from.clone(),
        })
    }

    pub async fn send_magic_link(&self, to: &str, link: &Url) -> Result<(), LecternError> {
        let Some(api_key) = self.api_key.as_deref() else {
            info!(to, link = %link, "email API not configured; sign-in link logged instead");
            return Ok(());
        };

        let email = OutgoingEmail {
            from: &self.from,
            to: [to],
            subject: "Your Lectern sign-in link",
            html: format!(
                "<p>Tap the link below to sign in. It can be used once.</p>\
                 <p><a href=\"{link}\">Sign in to Lectern</a></p>"
            ),
            text: format!("Sign in to Lectern: {link}\nThe link can be used once."),
        };

        let resp = self
            .http
            .post(self.api_url.clone())
            .bearer_auth(api_key)
            .json(&email)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(LecternError::UpstreamStatus(resp.status()));
        }
        info!(to, "sign-in link mailed");
        Ok(())
    }
}
