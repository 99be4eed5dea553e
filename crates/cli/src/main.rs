use anyhow::Result;
use binlex::{env_filter, run, version_banner, Args};
use clap::Parser;
use tracing::debug;

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter(args.verbose))
        .with_target(true)
        .with_line_number(true)
        .with_writer(std::io::stderr)
        .init();
    debug!("Logging initialized (verbose={})", args.verbose);
    debug!("{}", version_banner());

    run(&args)?;
    Ok(())
}
