pub mod ui;

use clap::{error::ErrorKind, CommandFactory, Parser};
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
    tty::IsTty,
};
use ratatui::{
    backend::{Backend, CrosstermBackend},
    Frame, Terminal,
};
use std::{
    error::Error,
    fs::File,
    io::{self, stdin, Write},
    path::PathBuf,
    sync::Arc,
    thread,
    time::Duration,
};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tracing::{info, warn};

use mockprep::{
    app_dirs::AppDirs,
    collab::{IdentityProvider, KeyboardTranscriber, LoggingPurchaseFlow},
    config::{Config, ConfigStore, FileConfigStore},
    error::SessionError,
    ledger::{BalanceLedger, PrepPackage},
    logging,
    machine::{Action, MachineState, SessionDeps, SessionMachine, SessionView},
    model::UserId,
    policy::{AbandonPolicy, AnswerPolicy},
    question_bank::QuestionBank,
    registry::ActiveSessions,
    reports::{self, ReportSummary},
    runtime::{Command, FixedTicker, SessionHandle, SessionRunner},
    store::{SessionStore, SqliteStore},
};

use crate::ui::{InputMode, Screen};

/// How long to wait for an abandoned session to be recorded on exit.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);
/// How long past its clock an `active` session row may sit before it is
/// treated as left behind by an exited process.
const STALE_GRACE: Duration = Duration::from_secs(60);

/// timed mock interviews in the terminal
#[derive(Parser, Debug, Clone)]
#[clap(
    version,
    about,
    long_about = "Timed mock interviews in the terminal. Each interview uses one prep, walks through a fixed set of behavioral and technical questions, and records your spoken (typed) answers and code."
)]
pub struct Cli {
    /// who is practicing
    #[clap(short, long)]
    user: Option<String>,

    /// interview length in seconds
    #[clap(short, long)]
    secs: Option<u64>,

    /// number of questions to ask
    #[clap(short, long)]
    questions: Option<usize>,

    /// question set to draw from
    #[clap(long = "set")]
    question_set: Option<String>,

    /// draw questions at random (a behavioral opener always comes first)
    #[clap(long)]
    shuffle: bool,

    /// sqlite database holding balances and interview history
    #[clap(long)]
    db: Option<PathBuf>,

    /// add preps to the balance and exit
    #[clap(long)]
    grant: Option<u32>,

    /// buy a prep package and exit
    #[clap(long, value_enum)]
    buy: Option<PrepPackage>,

    /// print interview history and exit
    #[clap(long)]
    report: bool,

    /// write interview history as csv ('-' for stdout) and exit
    #[clap(long)]
    export: Option<PathBuf>,

    /// what re-answering a question does to the earlier answer
    #[clap(long, value_enum)]
    answer_policy: Option<AnswerPolicy>,

    /// whether leaving mid-interview returns the prep
    #[clap(long, value_enum)]
    abandon_policy: Option<AbandonPolicy>,

    /// store the options given on this run as the new defaults
    #[clap(long)]
    save_config: bool,

    /// list the bundled question sets and exit
    #[clap(long)]
    list_sets: bool,
}

impl Cli {
    /// Overlays command line options on the stored config.
    fn apply(&self, config: &mut Config) {
        if let Some(user) = &self.user {
            config.user_id = user.clone();
        }
        if let Some(secs) = self.secs {
            config.session_secs = secs;
        }
        if let Some(questions) = self.questions {
            config.question_count = questions;
        }
        if let Some(set) = &self.question_set {
            config.question_set = set.clone();
        }
        if self.shuffle {
            config.shuffle = true;
        }
        if let Some(policy) = self.answer_policy {
            config.answer_policy = policy;
        }
        if let Some(policy) = self.abandon_policy {
            config.abandon_policy = policy;
        }
    }

    fn is_admin(&self) -> bool {
        self.grant.is_some() || self.buy.is_some() || self.report || self.export.is_some()
    }
}

/// Work for the request forwarder, in the order keys were pressed.
#[derive(Debug)]
enum Request {
    Session(Command),
    Buy(PrepPackage),
}

pub struct App {
    pub screen: Screen,
    editing_code: bool,
    requests: mpsc::UnboundedSender<Request>,
    notices: mpsc::UnboundedReceiver<String>,
    views: watch::Receiver<SessionView>,
    transcriber: Arc<KeyboardTranscriber>,
}

impl App {
    fn new(
        handle: SessionHandle,
        ledger: Arc<dyn BalanceLedger>,
        user: UserId,
        transcriber: Arc<KeyboardTranscriber>,
        question_set: String,
    ) -> Self {
        let views = handle.watch();
        let (requests, rx) = mpsc::unbounded_channel();
        let (notice_tx, notices) = mpsc::unbounded_channel();
        spawn_forwarder(handle, ledger, user, rx, notice_tx);

        let initial = views.borrow().clone();
        Self {
            screen: Screen::new(initial, question_set),
            editing_code: false,
            requests,
            notices,
            views,
            transcriber,
        }
    }

    fn send(&self, command: Command) {
        if self.requests.send(Request::Session(command)).is_err() {
            warn!("session forwarder is gone");
        }
    }

    fn allows(&self, action: Action) -> bool {
        self.screen.view.allows(action)
    }

    fn on_view(&mut self, view: SessionView) {
        if view.state != MachineState::Active {
            self.editing_code = false;
        }
        let was_dictating = self.screen.view.recording;
        self.screen.view = view;
        if was_dictating && !self.screen.view.recording && !self.editing_code {
            self.screen.draft.clear();
        }
        self.sync_mode();
    }

    fn sync_mode(&mut self) {
        self.screen.mode = if self.editing_code {
            InputMode::Code
        } else if self.screen.view.recording {
            InputMode::Dictating
        } else {
            InputMode::Normal
        };
    }

    fn dictate(&mut self) {
        let line = std::mem::take(&mut self.screen.draft);
        if line.trim().is_empty() {
            return;
        }
        let text = if self.screen.view.transcript.is_empty() {
            line
        } else {
            format!(" {line}")
        };
        if !self.transcriber.dictate(&text) {
            self.screen.status = Some("Not recording.".to_string());
        }
    }

    fn open_code(&mut self) {
        self.editing_code = true;
        self.screen.draft = self.screen.view.code.clone().unwrap_or_default();
        self.sync_mode();
    }

    /// Returns true when the user asked to leave.
    fn on_key(&mut self, key: KeyEvent) -> bool {
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            return true;
        }
        self.screen.status = None;

        match self.screen.mode {
            InputMode::Code => match key.code {
                KeyCode::Esc => {
                    self.editing_code = false;
                    let code = std::mem::take(&mut self.screen.draft);
                    self.send(Command::SetCode(code));
                    self.sync_mode();
                }
                KeyCode::Enter => self.screen.draft.push('\n'),
                KeyCode::Tab => self.screen.draft.push_str("    "),
                KeyCode::Backspace => {
                    self.screen.draft.pop();
                }
                KeyCode::Char(c) => self.screen.draft.push(c),
                _ => {}
            },
            InputMode::Dictating => match key.code {
                KeyCode::Enter if self.screen.draft.trim().is_empty() => {
                    self.send(Command::ToggleRecording)
                }
                KeyCode::Enter => self.dictate(),
                KeyCode::Esc => {
                    self.dictate();
                    self.send(Command::ToggleRecording);
                }
                KeyCode::Tab if self.allows(Action::EditCode) => {
                    self.dictate();
                    self.open_code();
                }
                KeyCode::Backspace => {
                    self.screen.draft.pop();
                }
                KeyCode::Char(c) => self.screen.draft.push(c),
                _ => {}
            },
            InputMode::Normal => match key.code {
                KeyCode::Esc | KeyCode::Char('q') => return true,
                KeyCode::Char('s') if self.allows(Action::Start) => self.send(Command::Start),
                KeyCode::Char('r') if self.allows(Action::ToggleRecording) => {
                    self.send(Command::ToggleRecording)
                }
                KeyCode::Char('c') if self.allows(Action::EditCode) => self.open_code(),
                KeyCode::Char('n') if self.allows(Action::Advance) => self.send(Command::Advance),
                KeyCode::Char('e') if self.allows(Action::End) => self.send(Command::End),
                KeyCode::Char(c @ '1'..='3') if self.screen.view.needs_purchase => {
                    let packages = PrepPackage::all();
                    let index = c as usize - '1' as usize;
                    if self.requests.send(Request::Buy(packages[index])).is_err() {
                        warn!("session forwarder is gone");
                    }
                }
                _ => {}
            },
        }
        false
    }
}

/// Sends UI requests to the session one at a time and reports failures
/// back as status lines. Owns the only `SessionHandle`, so it going away
/// is what closes the session.
fn spawn_forwarder(
    handle: SessionHandle,
    ledger: Arc<dyn BalanceLedger>,
    user: UserId,
    mut requests: mpsc::UnboundedReceiver<Request>,
    notices: mpsc::UnboundedSender<String>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(request) = requests.recv().await {
            let notice = match request {
                Request::Session(command) => match handle.send(command).await {
                    Ok(_) => None,
                    Err(err) => Some(err.user_message()),
                },
                Request::Buy(package) => match ledger.grant(&user, package.preps()).await {
                    Ok(balance) => {
                        info!(%user, %package, remaining = balance.remaining, "preps purchased");
                        if let Err(err) = handle.refresh_balance().await {
                            warn!(error = %err, "balance refresh failed");
                        }
                        Some(format!(
                            "Added {} preps. Press s to start.",
                            package.preps()
                        ))
                    }
                    Err(err) => {
                        warn!(%user, error = %err, "purchase failed");
                        Some(SessionError::from(err).user_message())
                    }
                },
            };
            if let Some(notice) = notice {
                if notices.send(notice).is_err() {
                    break;
                }
            }
        }
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    let _log_guard = AppDirs::log_dir().and_then(|dir| logging::init(&dir).ok());

    let config_store = FileConfigStore::new();
    let mut config = config_store.load();
    cli.apply(&mut config);

    if cli.save_config {
        config_store.save(&config)?;
        println!("saved defaults to {}", config_store.path().display());
    }

    if cli.list_sets {
        for name in QuestionBank::available() {
            println!("{name}");
        }
        return Ok(());
    }

    let Some(db_path) = cli.db.clone().or_else(AppDirs::db_path) else {
        let mut cmd = Cli::command();
        cmd.error(ErrorKind::Io, "could not resolve a database path, pass --db")
            .exit();
    };
    let store = Arc::new(SqliteStore::open(&db_path)?);
    let identity = config.identity();
    let user = identity.current_user_id();

    let max_age = config.session_secs.saturating_add(STALE_GRACE.as_secs());
    let closed = store.abandon_stale(&user, max_age, config.abandon_policy).await?;
    if closed > 0 {
        info!(%user, closed, "closed sessions left active by an earlier run");
    }

    if cli.is_admin() {
        return run_admin(&cli, &store, &user).await;
    }
    if cli.save_config {
        return Ok(());
    }

    if !stdin().is_tty() {
        let mut cmd = Cli::command();
        cmd.error(ErrorKind::Io, "stdin must be a tty").exit();
    }

    let bank = QuestionBank::load(&config.question_set)?;
    let questions = if config.shuffle {
        bank.pick(config.question_count)
    } else {
        bank.first(config.question_count)
    };

    let transcriber = Arc::new(KeyboardTranscriber::new());
    let deps = SessionDeps {
        ledger: store.clone(),
        store: store.clone(),
        transcriber: transcriber.clone(),
        purchase: Arc::new(LoggingPurchaseFlow),
        registry: Arc::new(ActiveSessions::new()),
    };
    let machine = SessionMachine::new(user.clone(), questions, config.session_settings(), deps)?;
    let (handle, session_task) = SessionRunner::new(machine, FixedTicker::every_second()).spawn();
    info!(%user, set = %bank.name, db = %db_path.display(), "interview screen opened");

    enable_raw_mode()?;

    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new(handle, store.clone(), user, transcriber, bank.name.clone());
    let result = start_tui(&mut terminal, &mut app).await;

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen,)?;
    terminal.show_cursor()?;

    // Dropping the app drops the last handle, which abandons a live session.
    drop(app);
    match tokio::time::timeout(SHUTDOWN_GRACE, session_task).await {
        Ok(Ok(machine)) => info!(state = %machine.state(), "session closed"),
        Ok(Err(err)) => warn!(error = %err, "session task failed"),
        Err(_) => warn!("session still saving at exit"),
    }

    result
}

async fn run_admin(
    cli: &Cli,
    store: &Arc<SqliteStore>,
    user: &UserId,
) -> Result<(), Box<dyn Error>> {
    if let Some(preps) = cli.grant {
        let balance = store.grant(user, preps).await?;
        println!(
            "granted {preps} preps to {user}, {} remaining",
            balance.remaining
        );
    }

    if let Some(package) = cli.buy {
        let balance = store.grant(user, package.preps()).await?;
        println!(
            "bought {package} ({} preps, {}), {} remaining",
            package.preps(),
            package.price_label(),
            balance.remaining
        );
    }

    if cli.report || cli.export.is_some() {
        let rows = store.sessions_for(user).await?;

        if cli.report {
            let balance = store.balance(user).await?;
            let summary = ReportSummary::build(&rows, &balance);
            print!("{}", reports::render_text(&rows, &summary));
        }

        match cli.export.as_deref() {
            Some(path) if path.as_os_str() == "-" => {
                reports::export_csv(&rows, io::stdout().lock())?;
            }
            Some(path) => {
                reports::export_csv(&rows, File::create(path)?)?;
                println!("exported {} interviews to {}", rows.len(), path.display());
            }
            None => {}
        }
    }

    io::stdout().flush()?;
    Ok(())
}

enum AppEvent {
    Key(KeyEvent),
    Resize,
}

fn get_app_events() -> mpsc::UnboundedReceiver<AppEvent> {
    let (tx, rx) = mpsc::unbounded_channel();

    thread::spawn(move || loop {
        let evt = match event::read() {
            Ok(Event::Key(key)) if key.kind == KeyEventKind::Press => AppEvent::Key(key),
            Ok(Event::Resize(_, _)) => AppEvent::Resize,
            Ok(_) => continue,
            Err(err) => {
                warn!(error = %err, "terminal event stream closed");
                break;
            }
        };

        if tx.send(evt).is_err() {
            break;
        }
    });

    rx
}

async fn start_tui<B: Backend>(
    terminal: &mut Terminal<B>,
    app: &mut App,
) -> Result<(), Box<dyn Error>> {
    let mut events = get_app_events();

    loop {
        terminal.draw(|f| ui(app, f))?;

        tokio::select! {
            changed = app.views.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = app.views.borrow_and_update().clone();
                app.on_view(view);
            }
            Some(notice) = app.notices.recv() => {
                app.screen.status = Some(notice);
            }
            evt = events.recv() => match evt {
                Some(AppEvent::Key(key)) => {
                    if app.on_key(key) {
                        break;
                    }
                }
                Some(AppEvent::Resize) => {}
                None => break,
            },
        }
    }

    Ok(())
}

fn ui(app: &App, f: &mut Frame) {
    f.render_widget(&app.screen, f.area());
}
