use log::{error, info};

fn main() {
    // Logs go to stderr; stdout carries the DAP wire.
    env_logger::init();
    info!("midap debug adapter starting");

    if let Err(e) = midap_session::start() {
        error!("session ended with error: {e}");
        std::process::exit(1);
    }
}
