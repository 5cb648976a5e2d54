use anyhow::Result;
use flowline::cli::App;

#[tokio::main]
async fn main() -> Result<()> {
    let mut app = App::from_args().await?;
    let args = flowline::cli::Args::parse_args();

    app.run(args).await?;

    Ok(())
}
