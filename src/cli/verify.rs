use anyhow::Result;

use crate::core::AppConfig;
use crate::mail::{MailTransport, SmtpMailer};

pub async fn run() -> Result<()> {
    let config = AppConfig::from_env()?;
    let mailer = SmtpMailer::from_config(&config)?;

    println!(
        "Connecting to {}:{} as {}",
        config.smtp_host, config.smtp_port, config.smtp_user
    );
    mailer.verify().await?;
    println!("SMTP relay accepted the connection");

    Ok(())
}
