use davprobe::config::{Settings, usage};
use davprobe::orchestrator::Orchestrator;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::from_env().apply_args(std::env::args())?;
    if settings.help {
        println!("{}", usage());
        return Ok(());
    }
    let config = settings.into_config()?;

    println!("davprobe: WebDAV + push notification conformance check");
    println!("  server:    {}", config.http_url);
    println!("  channel:   {}", config.ws_url);
    println!("  username:  {}", config.username);
    println!("  password:  {}", "*".repeat(config.password.len()));
    println!(
        "  test dir:  {}",
        config.test_dir.as_deref().unwrap_or("(fresh container)")
    );
    println!("  timeout:   {}s", config.timeout.as_secs());
    println!("  debug:     {}", config.debug);
    println!("--------------------------------------------------");

    let orchestrator = Orchestrator::new(config)?;
    let report = orchestrator.run().await;
    print!("{}", report.render());
    Ok(())
}
