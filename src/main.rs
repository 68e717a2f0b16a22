use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    mender_cli::cli::app::run().await
}
