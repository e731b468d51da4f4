use std::io::Write;
use std::path::PathBuf;

use log::{debug, error};
use tokio::runtime::Builder;

use pqecho::cert_gen::write_demo_identity;
use pqecho::config::{self, Config, client_tls_settings, server_tls_settings};
use pqecho::echo_client::{EchoClientOptions, connect_channel, run_echo_client};
use pqecho::echo_server::{EchoServerOptions, run_echo_server};
use pqecho::socket_util::new_tcp_listener;
use pqecho::tls_context::TlsContext;

const DEFAULT_CERT_DIR: &str = "cert";

fn print_usage_and_exit(arg0: String) {
    eprintln!("Usage: {arg0} [--threads/-t N] <command> [args]");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  server [config.yaml]             run the echo server");
    eprintln!("  client [--one-shot] [host] [config.yaml]");
    eprintln!("                                   connect, send stdin lines, print echoes");
    eprintln!("                                   --one-shot: stop after the first line");
    eprintln!("  generate-certs [dir]             write srv.crt, srv.key and ca.crt (default: {DEFAULT_CERT_DIR})");
    std::process::exit(1);
}

#[derive(Debug, Default, PartialEq, Eq)]
struct ClientArgs {
    host: Option<String>,
    config_path: Option<String>,
    one_shot: bool,
}

fn parse_client_args(args: Vec<String>) -> Result<ClientArgs, String> {
    let mut parsed = ClientArgs::default();
    let mut positional = Vec::new();
    for arg in args {
        if arg == "--one-shot" || arg == "-1" {
            parsed.one_shot = true;
        } else if arg.starts_with('-') {
            return Err(format!("Invalid client argument: {arg}"));
        } else {
            positional.push(arg);
        }
    }
    if positional.len() > 2 {
        return Err("Too many arguments for client".to_string());
    }
    let mut positional = positional.into_iter();
    parsed.host = positional.next();
    parsed.config_path = positional.next();
    Ok(parsed)
}

async fn load_config_or_exit(path: Option<&str>) -> Config {
    match config::load_config(path).await {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {e}");
            std::process::exit(1);
        }
    }
}

async fn run_server(config_path: Option<String>) -> i32 {
    let config = load_config_or_exit(config_path.as_deref()).await;
    debug!("{config:#?}");

    let settings = match server_tls_settings(&config) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Invalid config: {e}");
            return 1;
        }
    };
    let context = match TlsContext::new_server_with_settings(settings) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to create server context: {e}");
            if e.class() == pqecho::error::ErrorClass::Configuration {
                eprintln!("cert didn't get generated? try `generate-certs {DEFAULT_CERT_DIR}`");
            }
            return 1;
        }
    };

    let listener = match new_tcp_listener(config.server.bind_address, config.server.backlog) {
        Ok(l) => l,
        Err(e) => {
            eprintln!("Failed to bind {}: {e}", config.server.bind_address);
            context.free();
            return 1;
        }
    };

    let options = EchoServerOptions::from(&config.server);
    if let Err(e) = run_echo_server(listener, context, options).await {
        error!("echo server stopped: {e}");
        return 1;
    }
    0
}

async fn run_client(args: ClientArgs) -> i32 {
    let config = load_config_or_exit(args.config_path.as_deref()).await;
    let host = args
        .host
        .unwrap_or_else(|| config.client.default_host.clone());

    let settings = match client_tls_settings(&config) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Invalid config: {e}");
            return 1;
        }
    };
    let context = match TlsContext::new_client_with_settings(settings) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to create client context: {e}");
            return 1;
        }
    };

    let channel = match connect_channel(&context, &host, config.client.port).await {
        Ok(c) => c,
        Err(e) => {
            eprintln!("connect fail: {e}");
            context.free();
            return 1;
        }
    };

    let options = EchoClientOptions {
        buffer_size: config.client.buffer_size,
        one_shot: args.one_shot,
    };
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let result = run_echo_client(channel, stdin, tokio::io::stdout(), &options).await;
    context.free();

    match result {
        Ok(lines) => {
            debug!("sent {lines} line(s)");
            0
        }
        Err(e) => {
            eprintln!("{e}");
            1
        }
    }
}

async fn run_generate_certs(dir: Option<String>) -> i32 {
    let dir = PathBuf::from(dir.unwrap_or_else(|| DEFAULT_CERT_DIR.to_string()));
    match write_demo_identity(&dir).await {
        Ok(written) => {
            println!(
                "--------------------------------------------------------------------------------"
            );
            println!("Certificate: {}", written.cert_path.display());
            println!("Private key: {}", written.key_path.display());
            println!("Trust anchor: {}", written.ca_cert_path.display());
            println!("SHA-256 fingerprint: {}", written.fingerprint);
            println!(
                "--------------------------------------------------------------------------------"
            );
            0
        }
        Err(e) => {
            eprintln!("Failed to generate certificates: {e}");
            1
        }
    }
}

fn main() {
    env_logger::builder()
        .format(|buf, record| {
            let timestamp = buf.timestamp();
            let level_style = buf.default_level_style(record.level());
            let sanitized_args = format!("{}", record.args())
                .chars()
                .map(|c| {
                    if c.is_ascii_graphic() || c == ' ' {
                        c
                    } else {
                        '?'
                    }
                })
                .collect::<String>();

            writeln!(
                buf,
                "[{} {level_style}{}{level_style:#} {}] {}",
                timestamp,
                record.level(),
                record.target(),
                sanitized_args
            )
        })
        .init();

    let mut args: Vec<String> = std::env::args().collect();
    let arg0 = args.remove(0);
    let mut num_threads = 0usize;

    while !args.is_empty() && args[0].starts_with('-') {
        if args[0] == "--threads" || args[0] == "-t" {
            args.remove(0);
            if args.is_empty() {
                eprintln!("Missing threads argument.");
                print_usage_and_exit(arg0);
                return;
            }
            num_threads = match args.remove(0).parse::<usize>() {
                Ok(n) => n,
                Err(e) => {
                    eprintln!("Invalid thread count: {e}");
                    print_usage_and_exit(arg0);
                    return;
                }
            };
        } else {
            eprintln!("Invalid argument: {}", args[0]);
            print_usage_and_exit(arg0);
            return;
        }
    }

    if args.is_empty() {
        print_usage_and_exit(arg0);
        return;
    }
    let command = args.remove(0);
    if !matches!(command.as_str(), "server" | "client" | "generate-certs") {
        eprintln!("Unknown command: {command}");
        print_usage_and_exit(arg0);
        return;
    }
    let mut first = None;
    let client_args = if command == "client" {
        match parse_client_args(args) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                eprintln!("{e}");
                print_usage_and_exit(arg0);
                return;
            }
        }
    } else {
        if args.len() > 1 {
            eprintln!("Too many arguments for {command}");
            print_usage_and_exit(arg0);
            return;
        }
        first = args.pop();
        None
    };

    // The server handles one connection at a time, so a single worker is
    // enough unless asked otherwise.
    let mut builder = if num_threads <= 1 {
        Builder::new_current_thread()
    } else {
        let mut mt = Builder::new_multi_thread();
        mt.worker_threads(num_threads);
        mt
    };

    let runtime = match builder.enable_io().enable_time().build() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Could not build tokio runtime: {e}");
            std::process::exit(1);
        }
    };

    let exit_code = runtime.block_on(async move {
        match (command.as_str(), client_args) {
            (_, Some(client_args)) => run_client(client_args).await,
            ("server", None) => run_server(first).await,
            _ => run_generate_certs(first).await,
        }
    });

    // Drop the runtime before exiting so stdout is flushed.
    drop(runtime);
    std::process::exit(exit_code);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_client_loops_over_input_by_default() {
        let parsed = parse_client_args(args(&["127.0.0.1", "config.yaml"])).unwrap();
        assert_eq!(
            parsed,
            ClientArgs {
                host: Some("127.0.0.1".to_string()),
                config_path: Some("config.yaml".to_string()),
                one_shot: false,
            }
        );
    }

    #[test]
    fn test_client_one_shot_flag() {
        let parsed = parse_client_args(args(&["--one-shot", "::1"])).unwrap();
        assert!(parsed.one_shot);
        assert_eq!(parsed.host.as_deref(), Some("::1"));
        assert_eq!(parsed.config_path, None);

        assert!(parse_client_args(args(&["-1"])).unwrap().one_shot);
    }

    #[test]
    fn test_client_rejects_bad_arguments() {
        assert!(parse_client_args(args(&["--bogus"])).is_err());
        assert!(parse_client_args(args(&["a", "b", "c"])).is_err());
    }
}
