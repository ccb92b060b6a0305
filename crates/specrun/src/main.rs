mod cli;
mod log;
mod ux;

use specrun_core::completion::INCOMPLETE_EXIT_CODE;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    if let Err(e) = cli::run().await {
        ux::present_error(e);
        // The run never reached completion.
        std::process::exit(INCOMPLETE_EXIT_CODE);
    }
}
