use anyhow::Result;
use email_sender::cli;

#[tokio::main]
async fn main() -> Result<()> {
    cli::run().await
}
