//! Agent entry point: load the local configuration, bring the pipeline up
//! and run until a termination signal asks for a cooperative stop.

use std::path::Path;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use log::{error, info};

use iotguard::consts::{AGENT_NAME, AGENT_VERSION, CONFIGURATION_FILE};
use iotguard::SecurityAgent;

static STOP_REQUESTED: AtomicBool = AtomicBool::new(false);

extern "C" fn request_stop(_signal: libc::c_int) {
    STOP_REQUESTED.store(true, Ordering::SeqCst);
}

fn install_signal_handlers() {
    unsafe {
        libc::signal(libc::SIGINT, request_stop as libc::sighandler_t);
        libc::signal(libc::SIGTERM, request_stop as libc::sighandler_t);
    }
}

fn main() {
    env_logger::init();
    install_signal_handlers();
    info!("{AGENT_NAME} {AGENT_VERSION} starting");

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| CONFIGURATION_FILE.to_string());

    let mut agent = match SecurityAgent::init(Path::new(&config_path)) {
        Ok(agent) => agent,
        Err(err) => {
            error!("agent initialization failed: {err}");
            process::exit(1);
        }
    };

    if let Err(err) = agent.start() {
        error!("agent startup failed: {err}");
        process::exit(1);
    }

    while !STOP_REQUESTED.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(200));
    }

    info!("termination requested, stopping");
    agent.stop();
}
