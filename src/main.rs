use mp3_transfer::Config;
use tracing::error;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt().with_env_filter(env_filter).init();
}

#[tokio::main]
async fn main() {
    init_tracing();

    // Load configuration from CLI and/or config file
    let config = Config::load().expect("Failed to load configuration");

    match mp3_transfer::run(config).await {
        Ok(downloaded) => println!("{}", downloaded.stored_location),
        Err(error) => {
            error!("{error:#}");
            std::process::exit(1);
        }
    }
}
