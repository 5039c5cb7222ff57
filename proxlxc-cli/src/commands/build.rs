use std::sync::Arc;

use clap::Args;
use proxlxc::{ConsoleUi, Hook, NoopHook, ShellHook};
use tokio_util::sync::CancellationToken;

use crate::cli::{ConfigArgs, GlobalFlags};

#[derive(Args, Debug)]
pub struct BuildArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Shell command to run inside the container while provisioning (repeatable, runs in order)
    #[arg(long = "shell", value_name = "COMMAND")]
    pub shell: Vec<String>,
}

pub async fn execute(args: BuildArgs, _global: &GlobalFlags) -> anyhow::Result<()> {
    let sources = args.config.raw_sources()?;

    let mut builder = proxlxc::Builder::new();
    for warning in builder.prepare(&sources)? {
        eprintln!("Warning: {}", warning);
    }

    let hook: Arc<dyn Hook> = if args.shell.is_empty() {
        Arc::new(NoopHook)
    } else {
        Arc::new(ShellHook::new(args.shell))
    };

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, cancelling build");
            on_signal.cancel();
        }
    });

    let artifact = builder
        .run(cancel, Arc::new(ConsoleUi::stdio()), hook)
        .await?;
    println!("{}", artifact);
    Ok(())
}
