//! policycalc: run PolicyEngine simulations and follow their progress.

use policycalc_lib::{app, config, errors, version};

fn main() {
    let config = config::AppConfig::parse();

    let level = if config.verbose {
        tracing::Level::INFO
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .with_writer(std::io::stderr)
        .init();
    tracing::info!(version = %version::full_version(), "policycalc starting");

    let code = match app::run(&config) {
        Ok(code) => code,
        Err(err) => {
            policycalc_cli::ui::print_error(&format!("{err:#}"));
            errors::exit_code(&err)
        }
    };
    std::process::exit(code);
}
