use std::io::{self, BufRead};
use std::sync::Arc;
use std::thread;

use chatterbox::logging::init_tracing;
use chatterbox::Relay::{install_signal_handler, Roster, ShutdownToken};
use chatterbox::{LogBuffer, RelayBuilder, RelayConfig};
use tracing::{error, info};

const HELP: &str = "Commands: list, logs, quit";

fn main() -> chatterbox::Result<()> {
    init_tracing()?;

    let server = RelayBuilder::from_config(RelayConfig::from_env())
        .build_server()
        .map_err(|e| {
            error!(error = %e, "failed to start chat server");
            e
        })?;

    let token = server.token();
    install_signal_handler(&token)?;

    println!("Chat server running on mailbox {}. {}", server.mailbox(), HELP);

    // detached: a read on stdin cannot be interrupted, the process exits around it
    {
        let token = token.clone();
        let roster = server.roster_handle();
        let log = Arc::clone(server.log());
        thread::Builder::new()
            .name("console".into())
            .spawn(move || console(token, roster, log))?;
    }

    token.wait();
    info!("stopping chat server");
    server.shutdown()?;
    Ok(())
}

fn console(token: ShutdownToken, roster: Roster, log: Arc<LogBuffer>) {
    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        match line.trim() {
            "" => {}
            "list" => {
                let names = roster.snapshot();
                println!("Connected clients ({}):", names.len());
                for name in names {
                    println!("  {}", name);
                }
            }
            "logs" => {
                let contents = log.read_snapshot();
                print!("{}", String::from_utf8_lossy(&contents));
            }
            "quit" => break,
            other => println!("Unknown command '{}'. {}", other, HELP),
        }
        if token.is_cancelled() {
            return;
        }
    }
    // quit or end of input
    token.cancel();
}
