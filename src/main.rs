use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use wayrunner::command_book::ActiveBook;
use wayrunner::config::Settings;
use wayrunner::input::RecordingInjector;
use wayrunner::kernel::event::{Notifier, UiEvent};
use wayrunner::kernel::scheduler::{ControlLoop, Environment};
use wayrunner::kernel::state::SharedState;
use wayrunner::kernel::time::ThreadPacer;
use wayrunner::resolver::{FrameSampler, IconProbe};
use wayrunner::routine::ActionSequence;
use wayrunner::vision::{LatestFrame, ScreenGrabber, Template, UnavailableClassifier};
use wayrunner::Session;

#[derive(Debug, Parser)]
#[command(name = "wayrunner", version, about = "Runs a cyclic waypoint routine and solves rune puzzles on the way")]
struct Cli {
    /// Settings file; created with defaults when missing.
    #[arg(long, default_value = "settings.json")]
    settings: PathBuf,

    /// Command book (JSON) to activate at startup.
    #[arg(long)]
    command_book: Option<PathBuf>,

    /// Routine to load after the command book.
    #[arg(long, requires = "command_book")]
    routine: Option<PathBuf>,

    /// Image of the buff icon shown after a solved rune.
    #[arg(long)]
    success_template: Option<PathBuf>,

    /// Root of the `routines/<book>` tree.
    #[arg(long, default_value = ".")]
    resources: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    wayrunner::logging::init();
    let cli = Cli::parse();

    let settings = Settings::load(&cli.settings).context("loading settings")?;
    if !cli.settings.exists() {
        if let Err(e) = settings.save(&cli.settings) {
            warn!("Could not write default settings: {}", e);
        }
    }
    let hotkey = settings.hotkeys.toggle.clone();
    let capture = settings.capture.clone();
    let settings = settings.shared();

    let state = Arc::new(SharedState::new());
    let routine = Arc::new(RwLock::new(ActionSequence::new()));
    let book: ActiveBook = Arc::new(RwLock::new(None));
    let (ui_tx, mut ui_rx) = mpsc::channel::<UiEvent>(256);
    let notifier = Notifier::new(ui_tx);

    let session = Arc::new(Session::new(
        Arc::clone(&state),
        Arc::clone(&routine),
        Arc::clone(&book),
        notifier.clone(),
        &cli.resources,
    ));
    if let Some(path) = &cli.command_book {
        session.load_command_book(path).context("loading command book")?;
    }
    if let Some(path) = &cli.routine {
        session.load_routine(path).context("loading routine")?;
    }

    // 1. Frame capture on its own OS thread
    let frames = Arc::new(LatestFrame::new((capture.left, capture.top)));
    let grabber = ScreenGrabber::new(Arc::clone(&frames), capture);
    std::thread::Builder::new()
        .name("screen-grabber".to_string())
        .spawn(move || grabber.run())
        .context("spawning screen grabber")?;

    // 2. Control loop on its own OS thread
    let template = cli
        .success_template
        .as_deref()
        .map(Template::load)
        .transpose()
        .context("loading success template")?;
    warn!("No input backend linked: key and mouse events are logged, not sent");
    warn!("No rune model linked: every rune sample reads as a miss");
    let env = Environment {
        input: Arc::new(RecordingInjector::new()),
        pacer: Arc::new(ThreadPacer),
        sampler: Box::new(FrameSampler::new(frames.clone(), Arc::new(UnavailableClassifier))),
        probe: Box::new(IconProbe::new(frames, template)),
        notifier,
    };
    let control = ControlLoop::new(Arc::clone(&state), routine, book, settings, env);
    std::thread::Builder::new()
        .name("control-loop".to_string())
        .spawn(move || control.run())
        .context("spawning control loop")?;

    // 3. UI notifications
    tokio::spawn(async move {
        while let Some(event) = ui_rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(json) if matches!(event, UiEvent::CursorChanged(_)) => debug!("ui {}", json),
                Ok(json) => info!("ui {}", json),
                Err(e) => warn!("Unserializable UI event {:?}: {}", event, e),
            }
        }
    });

    // 4. Console hotkeys
    let (quit_tx, mut quit_rx) = mpsc::channel::<()>(1);
    let console = Arc::clone(&session);
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        info!("Type '{}' to start/stop, 'load <file>', 'save <file>', 'book <file>' or 'quit'", hotkey);

        while let Ok(Some(line)) = lines.next_line().await {
            let line = line.trim();
            let (cmd, arg) = line.split_once(' ').map_or((line, ""), |(c, a)| (c, a.trim()));
            match cmd {
                "" => {}
                "quit" => {
                    let _ = quit_tx.send(()).await;
                    break;
                }
                c if c.eq_ignore_ascii_case(&hotkey) => {
                    let on = console.toggle_enabled();
                    info!("{}", if on { "Enabled" } else { "Disabled" });
                }
                "load" => report("load", console.load_routine(&resolve(&console, arg))),
                "save" => report("save", console.save_routine(&resolve(&console, arg))),
                "book" => report("book", console.load_command_book(Path::new(arg)).map(|_| ())),
                other => warn!("Unknown console command '{}'", other),
            }
        }
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Interrupted"),
        _ = quit_rx.recv() => info!("Quit requested"),
    }
    session.set_enabled(false);
    if session.inspect(|r| r.is_dirty()) {
        warn!("Exiting with unsaved routine changes");
    }
    // A pending stdin read would hold the runtime open until the next line
    std::process::exit(0)
}

/// Bare file names resolve inside the active book's routine directory.
fn resolve(session: &Session, arg: &str) -> PathBuf {
    let path = PathBuf::from(arg);
    if path.components().count() > 1 || path.is_absolute() {
        return path;
    }
    match session.routines_dir() {
        Ok(dir) => dir.join(path),
        Err(_) => path,
    }
}

fn report<E: std::fmt::Display>(what: &str, result: std::result::Result<(), E>) {
    match result {
        Ok(()) => info!("{} done", what),
        Err(e) => error!("{} failed: {}", what, e),
    }
}
