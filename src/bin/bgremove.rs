//! bgremove: remove image backgrounds from the command line

use bgremove_service::cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::main().await
}
