//! JSON command-book definitions.
//!
//! ```json
//! {
//!   "name": "kanna",
//!   "bindings": { "jump": "alt", "teleport": "e", "haku": "f1" },
//!   "commands": {
//!     "step": { "ops": [ { "op": "press", "key": "$direction", "hold": 0.05 },
//!                        { "op": "press", "key": "teleport" } ] },
//!     "buff": { "cooldown": 180, "ops": [ { "op": "press", "key": "haku" } ] }
//!   }
//! }
//! ```
//!
//! Keys starting with `$` are taken from the directive's parameters, then
//! resolved through `bindings`. Every scripted command honours an optional
//! `repetitions` parameter.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use super::{Action, ActionContext, ActionFactory, CommandBook};
use crate::error::{ActionError, ConfigError};
use crate::kernel::time::{humanize, seconds, MAX_DURATION, TAP_GAP};
use crate::routine::Params;

const INLINE_SOURCE: &str = "<inline>";

/// Upper bound on `times` in a book and on a directive's `repetitions`.
pub const MAX_REPETITIONS: u32 = 100;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct BookDef {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    bindings: BTreeMap<String, String>,
    commands: BTreeMap<String, CommandDef>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct CommandDef {
    #[serde(default)]
    cooldown: Option<f64>,
    ops: Vec<Op>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case", deny_unknown_fields)]
enum Op {
    Press {
        key: String,
        #[serde(default = "default_hold")]
        hold: f64,
        #[serde(default = "default_times")]
        times: u32,
    },
    Wait {
        seconds: f64,
    },
}

fn default_hold() -> f64 {
    0.05
}

fn default_times() -> u32 {
    1
}

pub fn load(path: &Path) -> Result<CommandBook, ConfigError> {
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let fallback = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "unnamed".to_string());
    compile(&text, path, &fallback)
}

/// Compile a definition held in memory.
pub fn from_str(text: &str, fallback_name: &str) -> Result<CommandBook, ConfigError> {
    compile(text, Path::new(INLINE_SOURCE), fallback_name)
}

fn compile(text: &str, origin: &Path, fallback_name: &str) -> Result<CommandBook, ConfigError> {
    let def: BookDef = serde_json::from_str(text).map_err(|source| ConfigError::Parse {
        path: origin.to_path_buf(),
        source,
    })?;
    let name = def.name.unwrap_or_else(|| fallback_name.to_string());

    let mut builder = CommandBook::builder(&name);
    for (label, key) in &def.bindings {
        builder = builder.bind(label, key);
    }
    for (command, cmd) in def.commands {
        let compiled = compile_command(&name, &command, &cmd)?;
        builder = builder.register(&command, ScriptedFactory::new(&command, compiled));
    }
    builder.build()
}

/// Validate one command and convert its numbers to durations.
fn compile_command(book: &str, command: &str, cmd: &CommandDef) -> Result<CompiledCommand, ConfigError> {
    let fail = |message: String| ConfigError::Compile {
        book: book.to_string(),
        command: command.to_string(),
        message,
    };
    let duration = |what: &str, value: f64| {
        seconds(value).ok_or_else(|| {
            fail(format!(
                "{} must be between 0 and {} seconds, got {}",
                what,
                MAX_DURATION.as_secs(),
                value
            ))
        })
    };

    if command.trim().is_empty() {
        return Err(fail("command name is empty".to_string()));
    }
    if cmd.ops.is_empty() {
        return Err(fail("no ops".to_string()));
    }
    let cooldown = match cmd.cooldown {
        None => None,
        Some(c) if c.is_finite() && c >= 0.0 => Some(
            Duration::try_from_secs_f64(c).map_err(|e| fail(format!("cooldown {}: {}", c, e)))?,
        ),
        Some(c) => return Err(fail(format!("cooldown must be a non-negative number of seconds, got {}", c))),
    };

    let mut ops = Vec::with_capacity(cmd.ops.len());
    for op in &cmd.ops {
        ops.push(match op {
            Op::Press { key, hold, times } => {
                if key.trim().is_empty() || key == "$" {
                    return Err(fail("press without a key".to_string()));
                }
                if *times > MAX_REPETITIONS {
                    return Err(fail(format!("times must be at most {}, got {}", MAX_REPETITIONS, times)));
                }
                Resolved::Press {
                    key: key.clone(),
                    hold: duration("hold", *hold)?,
                    times: *times,
                }
            }
            Op::Wait { seconds } => Resolved::Wait(duration("wait", *seconds)?),
        });
    }
    Ok(CompiledCommand { cooldown, ops })
}

struct CompiledCommand {
    /// Minimum time between two runs; skipped runs are no-ops.
    cooldown: Option<Duration>,
    // Press keys may still hold `$param` placeholders
    ops: Vec<Resolved>,
}

struct ScriptedFactory {
    name: String,
    command: CompiledCommand,
    // Shared by every instance: a cooldown belongs to the skill, not the step
    last_run: Arc<Mutex<Option<Instant>>>,
}

impl ScriptedFactory {
    fn new(name: &str, command: CompiledCommand) -> Self {
        Self {
            name: name.to_lowercase(),
            command,
            last_run: Arc::new(Mutex::new(None)),
        }
    }
}

impl ActionFactory for ScriptedFactory {
    fn build(&self, params: &Params) -> Result<Box<dyn Action>, ActionError> {
        let repetitions = params.u32_or(&self.name, "repetitions", 1)?;
        if repetitions > MAX_REPETITIONS {
            return Err(ActionError::InvalidParam {
                command: self.name.clone(),
                param: "repetitions".to_string(),
                message: format!("at most {} allowed, got {}", MAX_REPETITIONS, repetitions),
            });
        }
        // Resolve `$param` keys now so a bad routine fails before any key is pressed
        let mut ops = Vec::with_capacity(self.command.ops.len());
        for op in &self.command.ops {
            ops.push(match op {
                Resolved::Press { key, hold, times } => Resolved::Press {
                    key: substitute(&self.name, key, params)?,
                    hold: *hold,
                    times: *times,
                },
                Resolved::Wait(d) => Resolved::Wait(*d),
            });
        }
        Ok(Box::new(ScriptedAction {
            ops,
            repetitions,
            cooldown: self.command.cooldown,
            last_run: Arc::clone(&self.last_run),
        }))
    }
}

fn substitute(command: &str, key: &str, params: &Params) -> Result<String, ActionError> {
    match key.strip_prefix('$') {
        None => Ok(key.to_string()),
        Some(param) => params
            .get(param)
            .map(str::to_string)
            .ok_or_else(|| ActionError::InvalidParam {
                command: command.to_string(),
                param: param.to_string(),
                message: "missing".to_string(),
            }),
    }
}

enum Resolved {
    Press { key: String, hold: Duration, times: u32 },
    Wait(Duration),
}

struct ScriptedAction {
    ops: Vec<Resolved>,
    repetitions: u32,
    cooldown: Option<Duration>,
    last_run: Arc<Mutex<Option<Instant>>>,
}

impl Action for ScriptedAction {
    fn execute(&mut self, ctx: &mut ActionContext<'_>) -> Result<(), ActionError> {
        if let Some(cooldown) = self.cooldown {
            let mut last = self.last_run.lock().unwrap_or_else(PoisonError::into_inner);
            let now = Instant::now();
            if matches!(*last, Some(t) if now.duration_since(t) < cooldown) {
                return Ok(());
            }
            *last = Some(now);
        }

        for _ in 0..self.repetitions {
            for op in &self.ops {
                match op {
                    Resolved::Press { key, hold, times } => {
                        let key = ctx.key(key).to_string();
                        for _ in 0..*times {
                            ctx.input.press_key(&key, humanize(*hold, ctx.state.stage_fright()))?;
                            ctx.pacer.sleep(TAP_GAP);
                        }
                    }
                    Resolved::Wait(d) => ctx.pacer.sleep(*d),
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOOK: &str = r#"{
        "name": "kanna",
        "bindings": { "teleport": "e", "haku": "f1" },
        "commands": {
            "step": { "ops": [ { "op": "press", "key": "$direction" },
                               { "op": "press", "key": "teleport" } ] },
            "buff": { "cooldown": 180, "ops": [ { "op": "press", "key": "haku" } ] }
        }
    }"#;

    #[test]
    fn compiles_with_builtins_filled_in() {
        let book = from_str(BOOK, "fallback").unwrap();
        assert_eq!(book.name(), "kanna");
        for command in ["buff", "step", "move", "adjust", "wait", "walk", "fall"] {
            assert!(book.contains(command), "missing {command}");
        }
        assert_eq!(book.key("teleport"), Some("e"));
    }

    #[test]
    fn missing_buff_is_a_config_error() {
        let text = r#"{ "commands": { "step": { "ops": [ { "op": "wait", "seconds": 0.1 } ] } } }"#;
        match from_str(text, "nobuff") {
            Err(ConfigError::MissingRequired { book, command }) => {
                assert_eq!(book, "nobuff");
                assert_eq!(command, "buff");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn unknown_op_does_not_compile() {
        let text = r#"{ "commands": { "buff": { "ops": [ { "op": "teleport" } ] } } }"#;
        assert!(matches!(from_str(text, "x"), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn empty_ops_do_not_compile() {
        let text = r#"{ "commands": { "buff": { "ops": [] }, "step": { "ops": [] } } }"#;
        assert!(matches!(from_str(text, "x"), Err(ConfigError::Compile { .. })));
    }

    #[test]
    fn missing_substitution_fails_at_build_time() {
        let book = from_str(BOOK, "x").unwrap();
        let err = book.build("step", &Params::new()).err().unwrap();
        assert!(matches!(err, ActionError::InvalidParam { ref param, .. } if param == "direction"));
    }
}
