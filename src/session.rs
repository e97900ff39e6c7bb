//! Editing collaborator: the only writer of sequence structure and of the
//! active command book. Every mutating operation is refused while the bot
//! is enabled.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError};
use tracing::info;

use crate::command_book::{ActiveBook, CommandBook};
use crate::error::{EditError, FormatError, SessionError};
use crate::kernel::event::{Notifier, UiEvent};
use crate::kernel::state::{SharedState, StateDelta};
use crate::routine::{ActionSequence, SharedRoutine};

/// `<root>/routines/<book>`: where routines written for a book live.
pub fn routines_dir(root: &Path, book: &str) -> PathBuf {
    root.join("routines").join(book)
}

pub struct Session {
    state: Arc<SharedState>,
    routine: SharedRoutine,
    book: ActiveBook,
    notifier: Notifier,
    root: PathBuf,
}

impl Session {
    pub fn new(
        state: Arc<SharedState>,
        routine: SharedRoutine,
        book: ActiveBook,
        notifier: Notifier,
        root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            state,
            routine,
            book,
            notifier,
            root: root.into(),
        }
    }

    pub fn set_enabled(&self, on: bool) {
        self.state.apply(StateDelta::SetEnabled(on));
    }

    pub fn toggle_enabled(&self) -> bool {
        self.state.apply(StateDelta::ToggleEnabled);
        self.state.enabled()
    }

    pub fn command_book(&self) -> Option<Arc<CommandBook>> {
        self.book.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Read-only view of the sequence.
    pub fn inspect<R>(&self, f: impl FnOnce(&ActionSequence) -> R) -> R {
        let routine = self.routine.read().unwrap_or_else(PoisonError::into_inner);
        f(&*routine)
    }

    /// Routine directory of the active book, created on demand.
    pub fn routines_dir(&self) -> Result<PathBuf, SessionError> {
        let book = self.command_book().ok_or(SessionError::NoCommandBook)?;
        let dir = routines_dir(&self.root, book.name());
        fs::create_dir_all(&dir).map_err(|source| SessionError::Directory {
            path: dir.clone(),
            source,
        })?;
        Ok(dir)
    }

    pub fn new_routine(&self) -> Result<(), SessionError> {
        self.ensure_stopped("start a new routine")?;
        self.routine.write().unwrap_or_else(PoisonError::into_inner).clear();
        self.notifier.publish(UiEvent::RoutineReplaced { len: 0 });
        Ok(())
    }

    /// Load a routine written for the active book. Any directive the book
    /// cannot build rejects the whole file; the current routine stays.
    pub fn load_routine(&self, path: &Path) -> Result<(), SessionError> {
        self.ensure_stopped("load a routine")?;
        let book = self.command_book().ok_or(SessionError::NoCommandBook)?;

        let steps = ActionSequence::read(path)?;
        let candidate = ActionSequence::from_steps(steps)?;
        if let Some((step, name)) = candidate.directive_kinds().find(|(_, kind)| !book.contains(kind)) {
            return Err(FormatError::UnknownCommand {
                step,
                name: name.to_string(),
            }
            .into());
        }

        let len = candidate.len();
        let mut routine = self.routine.write().unwrap_or_else(PoisonError::into_inner);
        routine.replace_steps(candidate.steps().to_vec())?;
        drop(routine);

        info!("Loaded routine {} ({} waypoints)", path.display(), len);
        self.notifier.publish(UiEvent::RoutineReplaced { len });
        Ok(())
    }

    pub fn save_routine(&self, path: &Path) -> Result<(), SessionError> {
        self.ensure_stopped("save the routine")?;
        self.routine.write().unwrap_or_else(PoisonError::into_inner).save(path)?;
        info!("Saved routine to {}", path.display());
        Ok(())
    }

    /// Compile and activate a command book. On error the previous book stays.
    pub fn load_command_book(&self, path: &Path) -> Result<Arc<CommandBook>, SessionError> {
        self.ensure_stopped("load a command book")?;
        let book = CommandBook::load(path)?;
        self.install_command_book(book)
    }

    /// Activate an already-built book. The routine is invalidated: cleared,
    /// cursor back to 0, clean.
    pub fn install_command_book(&self, book: CommandBook) -> Result<Arc<CommandBook>, SessionError> {
        self.ensure_stopped("swap the command book")?;
        let book = Arc::new(book);
        *self.book.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&book));
        self.routine.write().unwrap_or_else(PoisonError::into_inner).clear();

        info!("Command book '{}' loaded", book.name());
        self.notifier.publish(UiEvent::CommandBookLoaded(book.name().to_string()));
        self.notifier.publish(UiEvent::RoutineReplaced { len: 0 });
        Ok(book)
    }

    /// Apply one structural edit.
    pub fn edit<R>(&self, f: impl FnOnce(&mut ActionSequence) -> Result<R, EditError>) -> Result<R, SessionError> {
        self.ensure_stopped("edit the routine")?;
        let mut routine = self.routine.write().unwrap_or_else(PoisonError::into_inner);
        Ok(f(&mut *routine)?)
    }

    fn ensure_stopped(&self, what: &'static str) -> Result<(), SessionError> {
        if self.state.enabled() {
            return Err(SessionError::Running(what));
        }
        Ok(())
    }
}
