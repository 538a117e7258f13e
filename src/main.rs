// ABOUTME: Binary entry point for the vemtl command line tool
// ABOUTME: Parses arguments, loads configuration and runs the selected command

use anyhow::Result;
use vemtl::cli::{App, Args};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse_args();
    let mut app = App::from_args(&args)?;

    app.run(args).await?;

    Ok(())
}
