use work_queue_cli::run_cli;

#[tokio::main]
async fn main() {
    if let Err(e) = run_cli().await {
        // Logging may not be initialised yet, so report on stderr directly
        eprintln!("error: {}", e);
        std::process::exit(e.exit_code());
    }
}
