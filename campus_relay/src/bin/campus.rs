// Interactive campus client.
//
// Connects and authenticates, keeps heartbeats going in the background, and
// offers a small numbered menu. Messages and broadcasts that arrived while
// the user was typing are printed before each prompt.
//
// Usage:
//   campus <CAMPUS> <DEPARTMENT> <PASSWORD> [SERVER_IP] [OPTIONS]

use std::io::{self, BufRead, Write};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use campus_relay::config::{DEFAULT_TCP_PORT, DEFAULT_UDP_PORT};
use campus_relay::{CampusClient, ClientOptions, Inbound};
use clap::Parser;
use log::error;

#[derive(Parser, Debug)]
#[command(name = "campus", version, about = "Campus client for the campus relay")]
struct Args {
    /// Campus name, e.g. Lahore
    campus: String,
    /// Department to identify as
    department: String,
    /// Campus secret
    password: String,
    /// Relay address
    #[arg(default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
    server_ip: IpAddr,
    #[arg(long, default_value_t = DEFAULT_TCP_PORT)]
    tcp_port: u16,
    #[arg(long, default_value_t = DEFAULT_UDP_PORT)]
    udp_port: u16,
    /// Seconds between heartbeats
    #[arg(long, default_value_t = 60)]
    heartbeat_secs: u64,
}

fn print_menu() {
    println!();
    println!("1. Send message");
    println!("2. Status");
    println!("3. Exit");
}

/// Print everything received since the last prompt. Returns false once the
/// relay has closed the connection.
fn show_inbound(client: &CampusClient) -> bool {
    let mut connected = true;
    for item in client.poll() {
        match item {
            Inbound::Message {
                source,
                department,
                text,
            } => println!("\n[Message from {source} ({department})]: {text}"),
            Inbound::Notice(line) => println!("\n[Server]: {line}"),
            Inbound::Broadcast(text) => println!("\n[BROADCAST]: {text}"),
            Inbound::Disconnected => {
                println!("\nDisconnected from server.");
                connected = false;
            }
        }
    }
    connected
}

fn prompt(input: &mut impl BufRead, label: &str) -> io::Result<Option<String>> {
    print!("{label}");
    io::stdout().flush()?;
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
}

fn send_interactive(client: &mut CampusClient, input: &mut impl BufRead) -> io::Result<()> {
    let Some(target) = prompt(input, "Target campus: ")? else {
        return Ok(());
    };
    let Some(department) = prompt(input, "Target department: ")? else {
        return Ok(());
    };
    let Some(text) = prompt(input, "Message: ")? else {
        return Ok(());
    };
    match client.send_message(target.trim(), department.trim(), &text) {
        Ok(()) => println!("Message sent."),
        Err(e) => println!("Could not send: {e}"),
    }
    Ok(())
}

fn run(args: Args) -> campus_relay::Result<()> {
    let options = ClientOptions {
        relay_tcp: SocketAddr::new(args.server_ip, args.tcp_port),
        relay_udp: SocketAddr::new(args.server_ip, args.udp_port),
        heartbeat_interval: Duration::from_secs(args.heartbeat_secs.max(1)),
    };
    let mut client = CampusClient::connect(&options, &args.campus, &args.department, &args.password)?;
    println!(
        "Authenticated as {} ({}). Broadcasts arrive on {}.",
        client.campus(),
        client.department(),
        client.udp_addr()
    );

    let stdin = io::stdin();
    let mut input = stdin.lock();
    loop {
        if !show_inbound(&client) {
            break;
        }
        print_menu();
        let Some(choice) = prompt(&mut input, "> ")? else {
            break;
        };
        match choice.trim() {
            "1" => send_interactive(&mut client, &mut input)?,
            "2" => println!(
                "Campus: {} | Department: {} | UDP: {}",
                client.campus(),
                client.department(),
                client.udp_addr()
            ),
            "3" => break,
            "help" => println!("Enter 1 to send a message, 2 for status, 3 to exit."),
            "" => {}
            other => println!("Unknown option '{other}'. Type 'help' for options."),
        }
    }

    client.disconnect();
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run(Args::parse()) {
        error!("{e}");
        std::process::exit(1);
    }
}
