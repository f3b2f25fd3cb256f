//! Interactive client.
//!
//! ```text
//! USAGE:
//!     dictkv-cli <HOST> <PORT>
//!
//! COMMANDS:
//!     $get <key>
//!     $set <key>=<value>
//! ```
//!
//! Each reply is printed as received. A failed request drops the connection;
//! the next prompt reconnects, retrying every second.

use anyhow::Context;
use dictkv::client::{Client, DEFAULT_RETRY_DELAY};
use dictkv::protocol::Command;
use std::io::Write;
use std::net::{IpAddr, SocketAddr};
use tokio::io::{AsyncBufReadExt, BufReader};

/// Parses one input line into a command.
///
/// Keys may not contain whitespace or `=`; values may not contain whitespace.
fn parse_line(line: &str) -> Option<Command> {
    let line = line.trim();

    if let Some(rest) = line.strip_prefix("$get") {
        if !rest.starts_with(char::is_whitespace) {
            return None;
        }
        let key = rest.trim();
        if key.is_empty() || key.contains(|c: char| c.is_whitespace() || c == '=') {
            return None;
        }
        return Some(Command::get(key));
    }

    if let Some(rest) = line.strip_prefix("$set") {
        if !rest.starts_with(char::is_whitespace) {
            return None;
        }
        let (key, value) = rest.split_once('=')?;
        let (key, value) = (key.trim(), value.trim());
        if key.is_empty() || key.contains(char::is_whitespace) {
            return None;
        }
        if value.is_empty() || value.contains(char::is_whitespace) {
            return None;
        }
        return Some(Command::set(key, value));
    }

    None
}

fn prompt() {
    print!("> ");
    let _ = std::io::stdout().flush();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() != 3 {
        eprintln!("Usage: {} <host> <port>", args[0]);
        std::process::exit(1);
    }
    let host: IpAddr = args[1].parse().context("invalid host address")?;
    let port: u16 = args[2].parse().context("invalid port number")?;
    let addr = SocketAddr::new(host, port);

    dictkv::init_tracing();

    let mut client = Some(Client::connect_with_retry(addr, DEFAULT_RETRY_DELAY).await);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        prompt();
        let Some(line) = lines.next_line().await? else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        let Some(command) = parse_line(&line) else {
            println!("Unknown command: {}", line);
            continue;
        };

        let mut connection = match client.take() {
            Some(connection) => connection,
            None => {
                println!("Reconnecting...");
                let connection = Client::connect_with_retry(addr, DEFAULT_RETRY_DELAY).await;
                println!("Reconnected");
                connection
            }
        };

        match connection.send(&command).await {
            Ok(reply) => {
                println!("{}", reply);
                client = Some(connection);
            }
            Err(e) => {
                let what = match command {
                    Command::Set { .. } => "set",
                    _ => "get",
                };
                println!("Failed to {} value: {}", what, e);
            }
        }
    }

    println!("Client stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_get() {
        assert_eq!(parse_line("$get name"), Some(Command::get("name")));
        assert_eq!(parse_line("  $get   name  "), Some(Command::get("name")));
        assert_eq!(parse_line("$getname"), None);
        assert_eq!(parse_line("$get"), None);
        assert_eq!(parse_line("$get a b"), None);
    }

    #[test]
    fn test_parse_set() {
        assert_eq!(parse_line("$set k=v"), Some(Command::set("k", "v")));
        assert_eq!(parse_line("$set k = v"), Some(Command::set("k", "v")));
        assert_eq!(parse_line("$set k"), None);
        assert_eq!(parse_line("$set k=a b"), None);
        assert_eq!(parse_line("$set =v"), None);
    }

    #[test]
    fn test_parse_unknown() {
        assert_eq!(parse_line("get name"), None);
        assert_eq!(parse_line("$del name"), None);
    }
}
