//! Resolve a single short link from the command line.
//!
//! ```text
//! resolve_link https://shr2.link/89BVVVXW
//! resolve_link 89BVVVXW --site shr2link
//! ```

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use dotenv::dotenv;
use tracing_subscriber::EnvFilter;

use gate_bypass::chromium::ChromeLauncher;
use gate_bypass::config::Config;
use gate_bypass::engine::Resolver;
use gate_bypass::sites;

#[derive(Parser, Debug)]
#[command(name = "resolve_link", about = "Resolve a gated short link to its target URL")]
struct Cli {
    /// Short link, or just its path when --site is given
    url: String,

    /// Site id; detected from the link host when omitted
    #[arg(long)]
    site: Option<String>,

    /// Show the browser window
    #[arg(long)]
    headful: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let site = match cli.site.clone() {
        Some(site) => site,
        None => match sites::detect(&cli.url) {
            Some(site) => site.id.to_string(),
            None => {
                eprintln!("❌ Could not detect the site for {}; pass --site", cli.url);
                let ids: Vec<_> = sites::all().iter().map(|s| s.id).collect();
                eprintln!("   Supported: {}", ids.join(", "));
                return ExitCode::FAILURE;
            }
        },
    };

    let config = Config::from_env();
    let launcher = ChromeLauncher::new(
        config.chrome_path.clone(),
        config.headless && !cli.headful,
        config.resolver.idle_budget(),
    );
    let resolver = Resolver::new(Arc::new(launcher), config.resolver);

    match resolver.resolve(&site, &cli.url).await {
        Ok(link) => {
            println!("{}", link.url);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("❌ {}: {}", e.kind(), e);
            ExitCode::FAILURE
        }
    }
}
