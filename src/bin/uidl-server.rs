//! this binary starts the uidl server with a small demo application
//! to see the list of options, type: `uidl-server --help`

use std::env::current_dir;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::exit;
use std::sync::Arc;

use clap::{arg_enum, crate_version, value_t, App, Arg};
use indexmap::IndexMap;
use tracing::{debug, info, Level};
use tracing_subscriber::FmtSubscriber;

use uidl::rpc::RpcInterface;
use uidl::{
    Configuration, ConnectorKey, ConnectorLogic, ConnectorType, MemorySessionStore,
    RayonThreadPool, Result, SessionState, SessionStore, SharedQueueThreadPool,
    SledSessionStore, ThreadPool, Ui, UiProvider, UidlError, UidlServer, Value,
};

arg_enum! {
    #[allow(non_camel_case_types)]
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    enum Store {
        memory,
        sled
    }
}

arg_enum! {
    #[allow(non_camel_case_types)]
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    enum Pool {
        shared,
        rayon
    }
}

const DEFAULT_ADDRESS: &str = "127.0.0.1:4000";
const DEFAULT_THREADS: &str = "4";

/// ['Opt'] holds parsed and validated options from the command line
#[derive(Debug)]
struct Opt {
    addr: SocketAddr,
    store: Store,
    pool: Pool,
    threads: u32,
    data_dir: PathBuf,
    config: Configuration,
}

impl Opt {
    /// validates the command line parameters and loads the configuration file, if any
    /// # Errors
    /// returns [`UidlError::StringErr`] if one of the parameters is invalid
    fn build(
        addr: &str,
        store: Store,
        pool: Pool,
        threads: &str,
        data_dir: Option<&str>,
        config: Option<&str>,
    ) -> Result<Opt> {
        let addr: SocketAddr = addr.parse().map_err(|_| {
            UidlError::StringErr(format!("could not parse {} into an IP address and port", addr))
        })?;
        let threads: u32 = threads
            .parse()
            .map_err(|_| UidlError::StringErr(format!("invalid number of threads: {}", threads)))?;
        if threads == 0 {
            return Err(UidlError::StringErr("the pool needs at least one thread".to_string()));
        }
        let data_dir = match data_dir {
            Some(dir) => PathBuf::from(dir),
            None => current_dir()?,
        };
        let config = match config {
            Some(path) => Configuration::load(&PathBuf::from(path))?,
            None => Configuration::default(),
        };
        Ok(Opt {
            addr,
            store,
            pool,
            threads,
            data_dir,
            config,
        })
    }
}

fn main() {
    // set up a tracing subscriber to log to STDERR
    subscriber_config();

    let matches = App::new("uidl-server")
        .version(crate_version!())
        .author("strohs <strohs1@gmail.com>")
        .about("serves UIDL sessions of a demo application")
        .arg(Arg::with_name("addr")
            .long("addr")
            .value_name("IP_ADDR:PORT")
            .help("sets the IP_ADDR:PORT that the server listens on")
            .default_value(DEFAULT_ADDRESS))
        .arg(Arg::with_name("store")
            .long("store")
            .value_name("STORE")
            .help("where sessions are persisted, either 'memory' or 'sled'")
            .possible_values(&Store::variants())
            .default_value("memory"))
        .arg(Arg::with_name("pool")
            .long("pool")
            .value_name("POOL")
            .help("the thread pool serving connections, either 'shared' or 'rayon'")
            .possible_values(&Pool::variants())
            .default_value("shared"))
        .arg(Arg::with_name("threads")
            .long("threads")
            .value_name("N")
            .help("the number of threads serving connections")
            .default_value(DEFAULT_THREADS))
        .arg(Arg::with_name("data-dir")
            .long("data-dir")
            .value_name("DIR")
            .help("the directory of the sled session store, the current directory by default"))
        .arg(Arg::with_name("config")
            .long("config")
            .value_name("FILE")
            .help("a JSON file with the deployment configuration and system messages"))
        .get_matches();

    let store = value_t!(matches, "store", Store).unwrap_or(Store::memory);
    let pool = value_t!(matches, "pool", Pool).unwrap_or(Pool::shared);
    let opt = match Opt::build(
        matches.value_of("addr").unwrap_or(DEFAULT_ADDRESS),
        store,
        pool,
        matches.value_of("threads").unwrap_or(DEFAULT_THREADS),
        matches.value_of("data-dir"),
        matches.value_of("config"),
    ) {
        Ok(opt) => opt,
        Err(err) => {
            eprintln!("{:?}", err);
            exit(1);
        }
    };

    if let Err(e) = run(opt) {
        eprintln!("{:?}", e);
        exit(1);
    }
}

fn run(opt: Opt) -> Result<()> {
    info!("uidl-server {}", env!("CARGO_PKG_VERSION"));
    info!("Session store: {}, thread pool: {} with {} threads", opt.store, opt.pool, opt.threads);
    info!("Listening on {}", opt.addr);

    match opt.store {
        Store::memory => run_with_store(MemorySessionStore::new(), opt),
        Store::sled => {
            let store = SledSessionStore::open(&opt.data_dir)?;
            run_with_store(store, opt)
        }
    }
}

fn run_with_store<S: SessionStore>(store: S, opt: Opt) -> Result<()> {
    match opt.pool {
        Pool::shared => run_with_pool(store, SharedQueueThreadPool::new(opt.threads)?, opt),
        Pool::rayon => run_with_pool(store, RayonThreadPool::new(opt.threads)?, opt),
    }
}

fn run_with_pool<S: SessionStore, P: ThreadPool>(store: S, pool: P, opt: Opt) -> Result<()> {
    let server = UidlServer::new(store, pool, opt.config, Arc::new(DemoApplication));
    server.run(opt.addr)
}

static DEMO_UI: ConnectorType = ConnectorType::new("demo.DemoUI");
static LABEL: ConnectorType = ConnectorType::new("demo.Label");
static BUTTON: ConnectorType = ConnectorType::new("demo.Button").with_styles(&["button.css"]);
static TEXT_FIELD: ConnectorType = ConnectorType::new("demo.TextField");

const BUTTON_RPC: &str = "demo.ButtonServerRpc";

uidl::bean! {
    #[derive(Debug, Default, Clone)]
    struct DemoUiState {
        caption: Option<String>,
    }
}

uidl::bean! {
    #[derive(Debug, Default, Clone)]
    struct LabelState {
        text: String,
    }
}

uidl::bean! {
    #[derive(Debug, Default, Clone)]
    struct ButtonState {
        caption: Option<String>,
        clicks: i32,
    }
}

uidl::bean! {
    #[derive(Debug, Default, Clone)]
    struct TextFieldState {
        text: String,
    }
}

/// a text field receiving its text as the legacy variable `text`
struct TextFieldLogic {
    label: ConnectorKey,
}

impl ConnectorLogic for TextFieldLogic {
    fn is_variable_owner(&self) -> bool {
        true
    }

    fn change_variables(
        &mut self,
        ui: &mut Ui,
        connector: ConnectorKey,
        mut variables: IndexMap<String, Value>,
    ) -> Result<()> {
        if let Some(Value::String(text)) = variables.shift_remove("text") {
            debug!("text field changed to {}", text);
            if let Some(label) = ui.state_mut::<LabelState>(self.label) {
                label.text = format!("Hello, {}", text);
            }
            if let Some(state) = ui.state_mut::<TextFieldState>(connector) {
                state.text = text;
            }
        }
        Ok(())
    }
}

/// a label, a button counting its clicks and a text field greeting whoever types a name
struct DemoApplication;

impl UiProvider for DemoApplication {
    fn create_ui(&self, state: &mut SessionState) -> Result<u32> {
        let id = state.create_ui::<DemoUiState>(&DEMO_UI)?;
        let ui = state
            .ui_mut(id)
            .ok_or_else(|| UidlError::Tree(format!("ui {} vanished", id)))?;
        let root = ui.root();
        ui.set_caption(root, Some("UIDL demo"))?;

        let label = ui.create_component::<LabelState>(&LABEL);
        let button = ui.create_component::<ButtonState>(&BUTTON);
        let text_field = ui.create_component::<TextFieldState>(&TEXT_FIELD);
        ui.add_component(root, label)?;
        ui.add_component(root, button)?;
        ui.add_component(root, text_field)?;
        ui.set_caption(button, Some("Click me"))?;

        let clicks = RpcInterface::new().method("click", vec![], move |ui: &mut Ui, button, _| {
            let clicks = match ui.state_mut::<ButtonState>(button) {
                Some(state) => {
                    state.clicks += 1;
                    state.clicks
                }
                None => return Ok(()),
            };
            if let Some(state) = ui.state_mut::<LabelState>(label) {
                state.text = format!("clicked {} times", clicks);
            }
            Ok(())
        });
        ui.register_rpc(button, BUTTON_RPC, Box::new(clicks))?;
        ui.set_logic(text_field, Box::new(TextFieldLogic { label }))?;
        Ok(id)
    }
}

/// configures a tracing subscriber that will log to STDERR
fn subscriber_config() {
    let subscriber = FmtSubscriber::builder()
        // all spans/events with a level higher than TRACE (e.g, debug, info, warn, etc.)
        // will be written to stderr.
        .with_max_level(Level::TRACE)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("setting tracing default subscriber failed");
}
