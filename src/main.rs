/// Keystone CRM authentication service entry point
use keystone_crm::{
    config::ServerConfig,
    context::AppContext,
    error::CrmResult,
    jobs::JobScheduler,
    server,
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> CrmResult<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "keystone_crm=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    print_banner();

    // Load and validate configuration
    let config = ServerConfig::from_env()?;
    config.validate()?;
    let config = Arc::new(config);

    // Create application context
    let ctx = AppContext::new(config).await?;

    // Start background jobs
    let scheduler = JobScheduler::new(Arc::clone(&ctx));
    scheduler.start();

    // Start server
    server::serve(ctx).await?;

    Ok(())
}

fn print_banner() {
    println!(
        r#"
    __ __                __
   / //_/__  __  _______/ /_____  ____  ___
  / ,<  / _ \/ / / / ___/ __/ __ \/ __ \/ _ \
 / /| |/  __/ /_/ (__  ) /_/ /_/ / / / /  __/
/_/ |_|\___/\__, /____/\__/\____/_/ /_/\___/
           /____/

        Keystone CRM Auth Service v{}
        "#,
        env!("CARGO_PKG_VERSION")
    );
}
