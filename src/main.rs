use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    match decision_orchestrator::server::run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("decision-orchestrator: {e}");
            ExitCode::from(e.exit_code())
        }
    }
}
