//! The uidl-client executable sends single requests to a uidl-server:
//!
//! `uidl-client init [--session ID] [--addr IP-PORT]`
//!
//!     Opens a UI, in a new session unless --session names a live one. Prints the session
//!     id and the UI id.
//!
//! `uidl-client uidl <SESSION> <UI> [PAYLOAD] [--repaint-all] [--addr IP-PORT]`
//!
//!     Sends a UIDL request with the given burst payload and prints the response.
//!
//! `uidl-client heartbeat <SESSION> <UI> [--addr IP-PORT]`
//!
//!     Sends a heartbeat. Exits with a non-zero code when the server does not know the UI.
//!
//! `uidl-client close <SESSION> [--addr IP-PORT]`
//!
//!     Invalidates a session.
//!
//! --addr accepts an IP address, either v4 or v6, and a port number, with the format IP:PORT.
//! If --addr is not specified then connect on 127.0.0.1:4000.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::process::exit;

use clap::{crate_version, App, Arg, ArgMatches, SubCommand};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use uidl::communication::REPAINT_ALL_PARAMETER;
use uidl::{Request, Result, UidlClient, UidlError};

const DEFAULT_ADDRESS: &str = "127.0.0.1:4000";

/// ['Opt'] holds parsed and validated options from the command line
#[derive(Debug)]
struct Opt {
    /// the server's ip:port
    addr: SocketAddr,
    req: Request,
}

impl Opt {
    /// validates the `addr` parameter is a valid IP address and PORT
    /// # Errors
    /// returns [`UidlError::StringErr`] if one of the parameters is invalid
    fn build(addr: &str, req: Request) -> Result<Opt> {
        let addr: SocketAddr = addr.parse().map_err(|_| {
            UidlError::StringErr(format!("could not parse {} into an IP address and port", addr))
        })?;
        Ok(Opt { addr, req })
    }
}

fn main() {
    subscriber_config();

    let session = || Arg::with_name("SESSION").required(true).index(1);
    let ui = || Arg::with_name("UI").required(true).index(2);
    let matches = App::new("uidl-client")
        .version(crate_version!())
        .author("strohs <strohs1@gmail.com>")
        .about("sends requests to a uidl-server")
        .subcommands(vec![
            SubCommand::with_name("init")
                .about("Opens a UI and prints its session and UI id")
                .arg(Arg::with_name("session").long("session").value_name("ID")),
            SubCommand::with_name("uidl")
                .about("Sends a UIDL request and prints the response")
                .arg(session())
                .arg(ui())
                .arg(Arg::with_name("PAYLOAD").index(3))
                .arg(Arg::with_name("repaint-all").long("repaint-all")),
            SubCommand::with_name("heartbeat")
                .about("Sends a heartbeat for a UI")
                .arg(session())
                .arg(ui()),
            SubCommand::with_name("close")
                .about("Invalidates a session")
                .arg(session()),
        ])
        .arg(Arg::with_name("addr")
            .long("addr")
            .value_name("IP_ADDR:PORT")
            .help("sets the IP_ADDR:PORT of the server to connect to")
            .default_value(DEFAULT_ADDRESS)
            .global(true))
        .get_matches();

    if let Err(e) = parse_options(&matches).and_then(run) {
        eprintln!("{}", e);
        exit(1);
    }
}

/// runs the requested command on a [`UidlClient`]
fn run(opt: Opt) -> Result<()> {
    let mut client = UidlClient::connect(opt.addr)?;
    match opt.req {
        Request::Init { session } => {
            let (session, ui) = client.init(session)?;
            println!("{} {}", session, ui);
        }
        Request::Heartbeat { session, ui } => {
            let status = client.heartbeat(&session, ui)?;
            if status != 200 {
                let message = format!("heartbeat refused with status {}", status);
                return Err(UidlError::StringErr(message));
            }
        }
        Request::Close { session } => client.close(&session)?,
        other => {
            let reply = client.send(other)?;
            if reply.status != 200 {
                let message = format!("request failed with status {}", reply.status);
                return Err(UidlError::StringErr(message));
            }
            println!("{}", reply.body);
        }
    }
    Ok(())
}

fn parse_ui(args: &ArgMatches) -> Result<u32> {
    let ui = args.value_of("UI").unwrap_or_default();
    ui.parse()
        .map_err(|_| UidlError::StringErr(format!("invalid ui id: {}", ui)))
}

fn session_arg(args: &ArgMatches) -> String {
    args.value_of("SESSION").map(String::from).unwrap_or_default()
}

/// parses the matches from the command line into an [`Opt`] struct
fn parse_options(matches: &ArgMatches) -> Result<Opt> {
    let addr = matches.value_of("addr").unwrap_or(DEFAULT_ADDRESS);
    match matches.subcommand() {
        ("init", Some(args)) => {
            let session = args.value_of("session").map(String::from);
            Opt::build(addr, Request::Init { session })
        }
        ("uidl", Some(args)) => {
            let mut parameters = BTreeMap::new();
            parameters.insert(
                uidl::communication::UI_ID_PARAMETER.to_string(),
                parse_ui(args)?.to_string(),
            );
            if args.is_present("repaint-all") {
                parameters.insert(REPAINT_ALL_PARAMETER.to_string(), "1".to_string());
            }
            let payload = args.value_of("PAYLOAD").unwrap_or_default().to_string();
            Opt::build(addr, Request::Uidl { session: session_arg(args), parameters, payload })
        }
        ("heartbeat", Some(args)) => {
            let ui = parse_ui(args)?;
            Opt::build(addr, Request::Heartbeat { session: session_arg(args), ui })
        }
        ("close", Some(args)) => Opt::build(addr, Request::Close { session: session_arg(args) }),
        _ => Err(UidlError::StringErr("no command given, see --help".to_string())),
    }
}

/// configures a tracing subscriber that will log to STDERR
fn subscriber_config() {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::WARN)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("setting tracing default subscriber failed");
}
