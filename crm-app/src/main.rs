use crm_app::{init_tracing, run, run_demo, AppConfig};

#[tokio::main]
async fn main() {
    init_tracing();
    let demo = std::env::args().any(|arg| arg == "--demo");
    let result = if demo {
        run_demo().await
    } else {
        match AppConfig::from_env() {
            Ok(config) => run(config).await,
            Err(err) => Err(err.to_string()),
        }
    };

    if let Err(err) = result {
        eprintln!("crm-app failed: {err}");
        std::process::exit(1);
    }
}
