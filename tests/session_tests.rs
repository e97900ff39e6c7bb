mod common;

use std::fs;
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;

use common::teleport_book;
use wayrunner::command_book::ActiveBook;
use wayrunner::error::{EditError, FormatError, SessionError};
use wayrunner::kernel::event::{Notifier, UiEvent};
use wayrunner::kernel::state::{Point, SharedState};
use wayrunner::routine::{ActionSequence, SharedRoutine, Step, Waypoint};
use wayrunner::session::Session;

const PATROL: &str = "*, x=0.1, y=0.2\n    jump\n*, x=0.8, y=0.2\n*, x=0.5, y=0.4, frequency=2\n";

struct Fixture {
    session: Session,
    routine: SharedRoutine,
    events: mpsc::Receiver<UiEvent>,
    dir: tempfile::TempDir,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let routine: SharedRoutine = Arc::new(RwLock::new(ActionSequence::new()));
        let book: ActiveBook = Arc::new(RwLock::new(None));
        let (tx, events) = mpsc::channel(64);
        let session = Session::new(
            Arc::new(SharedState::new()),
            Arc::clone(&routine),
            book,
            Notifier::new(tx),
            dir.path(),
        );
        Self {
            session,
            routine,
            events,
            dir,
        }
    }

    fn with_book() -> Self {
        let fixture = Self::new();
        fixture.session.install_command_book(teleport_book("tp")).unwrap();
        fixture
    }

    fn write(&self, name: &str, text: &str) -> std::path::PathBuf {
        let path = self.dir.path().join(name);
        fs::write(&path, text).unwrap();
        path
    }

    fn drain(&mut self) -> Vec<UiEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }
}

#[test]
fn test_mutations_are_refused_while_running() {
    let f = Fixture::with_book();
    let path = f.write("patrol.txt", PATROL);
    assert!(f.session.toggle_enabled());

    assert!(matches!(f.session.new_routine(), Err(SessionError::Running(_))));
    assert!(matches!(f.session.load_routine(&path), Err(SessionError::Running(_))));
    assert!(matches!(f.session.save_routine(&path), Err(SessionError::Running(_))));
    assert!(matches!(f.session.load_command_book(&path), Err(SessionError::Running(_))));
    assert!(matches!(
        f.session.edit(|seq| seq.push(Step::Waypoint(Waypoint::new(Point::default())))),
        Err(SessionError::Running(_))
    ));
    assert!(f.session.inspect(ActionSequence::is_empty));

    assert!(!f.session.toggle_enabled());
    f.session.load_routine(&path).unwrap();
    assert_eq!(f.session.inspect(ActionSequence::len), 3);
}

#[test]
fn test_routine_operations_need_a_book() {
    let f = Fixture::new();
    let path = f.write("patrol.txt", PATROL);
    assert!(matches!(f.session.load_routine(&path), Err(SessionError::NoCommandBook)));
    assert!(matches!(f.session.routines_dir(), Err(SessionError::NoCommandBook)));
}

#[test]
fn test_loading_a_book_invalidates_the_routine() {
    let mut f = Fixture::with_book();
    let path = f.write("patrol.txt", PATROL);
    f.session.load_routine(&path).unwrap();
    f.session.edit(|seq| seq.remove(0)).unwrap();
    f.routine.write().unwrap().step();
    f.drain();

    let book = f.write("kanna.json", r#"{ "commands": { "buff": { "ops": [ { "op": "press", "key": "f1" } ] },
                                                  "step": { "ops": [ { "op": "press", "key": "e" } ] } } }"#);
    let loaded = f.session.load_command_book(&book).unwrap();
    assert_eq!(loaded.name(), "kanna");

    let routine = f.routine.read().unwrap();
    assert!(routine.is_empty());
    assert_eq!(routine.cursor(), 0);
    assert!(!routine.is_dirty());
    drop(routine);

    assert_eq!(
        f.drain(),
        vec![
            UiEvent::CommandBookLoaded("kanna".to_string()),
            UiEvent::RoutineReplaced { len: 0 }
        ]
    );
}

#[test]
fn test_failed_book_load_keeps_the_previous_book() {
    let f = Fixture::with_book();
    let routine = f.write("patrol.txt", PATROL);
    f.session.load_routine(&routine).unwrap();

    let broken = f.write("broken.json", r#"{ "commands": { "step": { "ops": [ { "op": "press", "key": "e" } ] } } }"#);
    assert!(matches!(f.session.load_command_book(&broken), Err(SessionError::Config(_))));
    assert_eq!(f.session.command_book().unwrap().name(), "tp");
    assert_eq!(f.session.inspect(ActionSequence::len), 3);
}

#[test]
fn test_unknown_directive_rejects_the_whole_file() {
    let f = Fixture::with_book();
    let good = f.write("patrol.txt", PATROL);
    f.session.load_routine(&good).unwrap();

    let bad = f.write("bad.txt", "*, x=0.1, y=0.2\n*, x=0.3, y=0.2\n    teleport_home, to=town\n");
    let err = f.session.load_routine(&bad).unwrap_err();
    match err {
        SessionError::Format(FormatError::UnknownCommand { step, name }) => {
            assert_eq!(step, 1);
            assert_eq!(name, "teleport_home");
        }
        other => panic!("unexpected {other}"),
    }
    assert_eq!(f.session.inspect(ActionSequence::len), 3);

    let orphan = f.write("orphan.txt", "    jump\n*, x=0.3, y=0.2\n");
    assert!(matches!(
        f.session.load_routine(&orphan),
        Err(SessionError::Format(FormatError::OrphanDirective { line: 1, .. }))
    ));
}

#[test]
fn test_save_and_reload_through_the_routines_dir() {
    let mut f = Fixture::with_book();
    let dir = f.session.routines_dir().unwrap();
    assert_eq!(dir, f.dir.path().join("routines").join("tp"));
    assert!(dir.is_dir());

    f.session
        .edit(|seq| {
            seq.push(Step::Waypoint(Waypoint::new(Point::new(0.25, 0.75))))?;
            seq.push(Step::Waypoint(Waypoint::new(Point::new(0.5, 0.75))))
        })
        .unwrap();
    assert!(f.session.inspect(ActionSequence::is_dirty));

    let path = dir.join("loop.txt");
    f.session.save_routine(&path).unwrap();
    assert!(!f.session.inspect(ActionSequence::is_dirty));

    f.session.new_routine().unwrap();
    f.drain();
    f.session.load_routine(&path).unwrap();
    assert_eq!(f.drain(), vec![UiEvent::RoutineReplaced { len: 2 }]);
    assert_eq!(
        f.session.inspect(|seq| seq.get(1).and_then(Step::location)),
        Some(Point::new(0.5, 0.75))
    );
}

#[test]
fn test_edit_errors_surface_unchanged() {
    let f = Fixture::with_book();
    let err = f.session.edit(|seq| seq.remove(4)).unwrap_err();
    assert!(matches!(err, SessionError::Edit(EditError::OutOfRange { index: 4, len: 0 })));
}
