use anyhow::Result;
use clap::Parser;

#[tokio::main]
async fn main() -> Result<()> {
    hint_migration_cli::init_tracing();
    let cli = hint_migration_cli::Cli::parse();
    hint_migration_cli::run_cli(cli).await
}
