use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    dicetable::cli::run_cli().await
}
