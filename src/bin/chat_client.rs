use std::env;
use std::io::{self, BufRead, Write};
use std::thread;

use chatterbox::logging::init_tracing;
use chatterbox::Relay::{install_signal_handler, ChatClient, ShutdownToken};
use chatterbox::Transport::{Message, MessageKind};
use chatterbox::{LogBuffer, RelayBuilder, RelayConfig};
use tracing::error;

const HELP: &str = "Type a message and press enter. Commands: /logs, /quit";

fn main() -> chatterbox::Result<()> {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <username>", args[0]);
        std::process::exit(1);
    }
    let username = args[1].trim();

    init_tracing()?;

    let mut client = match RelayBuilder::from_config(RelayConfig::from_env()).build_client(username) {
        Ok(client) => client,
        Err(e) => {
            error!(error = %e, "could not join the chat");
            eprintln!("Failed to connect as '{}': {}", username, e);
            std::process::exit(1);
        }
    };
    println!("{}", client.welcome().body);
    println!("{}", HELP);

    client.spawn_receiver(show)?;

    let token = client.token();
    install_signal_handler(&token)?;

    // reads stdin on its own thread so a server farewell or a signal can end the session
    let (lines_tx, lines_rx) = std::sync::mpsc::channel::<String>();
    {
        let token = token.clone();
        thread::Builder::new().name("stdin".into()).spawn(move || {
            for line in io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if lines_tx.send(line).is_err() {
                    return;
                }
            }
            token.cancel();
        })?;
    }

    session(&client, &token, &lines_rx);
    client.shutdown()?;
    println!("Goodbye.");
    Ok(())
}

fn session(client: &ChatClient, token: &ShutdownToken, lines: &std::sync::mpsc::Receiver<String>) {
    while !token.is_cancelled() {
        let line = match lines.recv_timeout(std::time::Duration::from_millis(200)) {
            Ok(line) => line,
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => continue,
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
        };
        match line.trim() {
            "" => {}
            "/quit" => break,
            "/logs" => match client.view_logs() {
                Ok(contents) => print!("{}", contents),
                Err(e) => eprintln!("Cannot read logs: {}", e),
            },
            body => {
                if let Err(e) = client.send_chat(body) {
                    eprintln!("Message not sent: {}", e);
                }
            }
        }
    }
}

fn show(message: Message) {
    match message.kind {
        MessageKind::Disconnect => println!("*** {} ***", message.body),
        MessageKind::Ack => println!("{}", message.body),
        _ => print!("{}", LogBuffer::render(&message)),
    }
    let _ = io::stdout().flush();
}
