use clap::Args;

use crate::cli::{ConfigArgs, GlobalFlags};

#[derive(Args, Debug)]
pub struct ValidateArgs {
    #[command(flatten)]
    pub config: ConfigArgs,
}

pub async fn execute(args: ValidateArgs, _global: &GlobalFlags) -> anyhow::Result<()> {
    let sources = args.config.raw_sources()?;

    let mut builder = proxlxc::Builder::new();
    let warnings = builder.prepare(&sources)?;
    for warning in &warnings {
        eprintln!("Warning: {}", warning);
    }

    println!("The configuration is valid.");
    Ok(())
}
