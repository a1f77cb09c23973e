use clap::Parser;
use taskweave::cli::{run_workflow, Args};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    run_workflow(args).await
}
