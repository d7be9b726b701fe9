use miette::Result;

#[tokio::main]
async fn main() -> Result<()> {
    gitsync::cli::run().await
}
