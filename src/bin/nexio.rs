use clap::Parser;
use nexio_guard::cli::utils::output_error;
use nexio_guard::cli::{Cli, OutputFormat};
use nexio_guard::GuardError;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_format = OutputFormat::from_cli(&cli);

    if let Err(e) = nexio_guard::cli::run(cli).await {
        match std::env::var("CLI_VERBOSE").as_deref() {
            Ok("true") | Ok("1") => eprintln!("Error: {e:?}"),
            _ => {
                let code = e.downcast_ref::<GuardError>().map(GuardError::error_code);
                output_error(&output_format, &e.to_string(), code)?;
            }
        }
        std::process::exit(1);
    }

    Ok(())
}
