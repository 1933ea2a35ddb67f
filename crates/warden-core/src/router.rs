//! Command dispatch: one raw token in, one [`CommandResult`] out.

use crate::catalog::{key_for, BulkReport, Catalog};
use crate::command::{Command, CommandResult, Verb, HELP_TEXT};
use crate::crypto::Direction;
use crate::engine::{Engine, TransformReport};
use crate::error::WardenError;
use crate::shutdown::{ShutdownKind, ShutdownSignal};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterMode {
    Normal,
    /// `-c` encrypts the catalog but leaves the service running.
    NoShutdown,
}

/// Result of one command plus whether it asks the service to stop once the
/// reply has been delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatch {
    pub result: CommandResult,
    pub shutdown_after_reply: bool,
}

impl Dispatch {
    fn reply(result: CommandResult) -> Self {
        Self {
            result,
            shutdown_after_reply: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub results: Vec<CommandResult>,
    pub shutdown_after_reply: bool,
}

/// Paths currently being transformed. Overlapping targets are refused.
#[derive(Default)]
struct InFlight {
    paths: Mutex<Vec<PathBuf>>,
}

struct Claim<'a> {
    owner: &'a InFlight,
    paths: Vec<PathBuf>,
}

impl InFlight {
    fn claim(&self, targets: Vec<PathBuf>) -> std::result::Result<Claim<'_>, PathBuf> {
        let mut held = self.paths.lock();
        for target in &targets {
            if let Some(busy) = held.iter().find(|p| overlaps(p, target)) {
                return Err(busy.clone());
            }
        }
        held.extend(targets.iter().cloned());
        Ok(Claim {
            owner: self,
            paths: targets,
        })
    }
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        let mut held = self.owner.paths.lock();
        for path in &self.paths {
            if let Some(idx) = held.iter().position(|p| p == path) {
                held.swap_remove(idx);
            }
        }
    }
}

fn overlaps(a: &Path, b: &Path) -> bool {
    a.starts_with(b) || b.starts_with(a)
}

pub struct Router {
    engine: Engine,
    catalog: Arc<Mutex<Catalog>>,
    shutdown: ShutdownSignal,
    mode: RouterMode,
    in_flight: InFlight,
}

impl Router {
    pub fn new(
        engine: Engine,
        catalog: Arc<Mutex<Catalog>>,
        shutdown: ShutdownSignal,
        mode: RouterMode,
    ) -> Self {
        Self {
            engine,
            catalog,
            shutdown,
            mode,
            in_flight: InFlight::default(),
        }
    }

    pub fn catalog(&self) -> &Arc<Mutex<Catalog>> {
        &self.catalog
    }

    /// Runs every command in order. A failing command never stops the rest.
    pub fn execute_batch(&self, commands: &[String], password: Option<&str>) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        for raw in commands.iter().filter(|c| !c.trim().is_empty()) {
            let dispatch = self.execute(raw, password);
            outcome.shutdown_after_reply |= dispatch.shutdown_after_reply;
            outcome.results.push(dispatch.result);
        }
        outcome
    }

    pub fn execute(&self, raw: &str, password: Option<&str>) -> Dispatch {
        let command = match Command::parse(raw) {
            Ok(command) => command,
            Err(err) => return Dispatch::reply(err.into()),
        };
        let password = match (command.verb.requires_password(), password) {
            (true, Some(pw)) if !pw.is_empty() => pw,
            (true, _) => {
                return Dispatch::reply(CommandResult::Error(format!(
                    "A password is required for {}",
                    command.verb.token().trim_end_matches('=')
                )))
            }
            (false, _) => "",
        };
        let path = command.path.as_deref().map(absolute);

        let dispatch = match (command.verb, path) {
            (Verb::Help, _) => Dispatch::reply(CommandResult::Success(HELP_TEXT.to_string())),
            (Verb::Encrypt, Some(path)) => self.transform(&path, Direction::Encrypt, password),
            (Verb::Decrypt, Some(path)) => self.transform(&path, Direction::Decrypt, password),
            (Verb::Add, Some(path)) => Dispatch::reply(self.add(&path)),
            (Verb::Remove, Some(path)) => Dispatch::reply(self.remove(&path)),
            (Verb::DecryptCatalog, _) => self.bulk(Direction::Decrypt, password),
            (Verb::EncryptCatalog, _) => self.bulk(Direction::Encrypt, password),
            (Verb::ViewCatalog, _) => Dispatch::reply(self.view()),
            (verb, None) => Dispatch::reply(CommandResult::Error(format!(
                "{} needs a path",
                verb.token()
            ))),
        };
        info!(verb = ?command.verb, result = ?dispatch.result, "command executed");
        dispatch
    }

    fn transform(&self, path: &Path, direction: Direction, password: &str) -> Dispatch {
        let resolved = PathBuf::from(key_for(&path.display().to_string()));
        let _claim = match self.in_flight.claim(vec![resolved]) {
            Ok(claim) => claim,
            Err(busy) => return Dispatch::reply(busy_warning(&busy)),
        };
        match self.engine.transform_path(path, direction, password) {
            Ok(report) => Dispatch::reply(describe_target(&report, direction)),
            Err(err) => self.failure(err),
        }
    }

    fn add(&self, path: &Path) -> CommandResult {
        let key = path.display().to_string();
        match self.catalog.lock().add(&key) {
            Ok(true) => CommandResult::Success(format!("Successfully added protected path: {key}")),
            Ok(false) => CommandResult::Success(format!("Path is already a protected path: {key}")),
            Err(err) => err.into(),
        }
    }

    fn remove(&self, path: &Path) -> CommandResult {
        let key = path.display().to_string();
        if self.catalog.lock().remove(&key) {
            CommandResult::Success(format!("Successfully removed protected path: {key}"))
        } else {
            CommandResult::Warning(format!("Path is not a protected path: {key}"))
        }
    }

    fn view(&self) -> CommandResult {
        CommandResult::Success(format!("[{}]", self.catalog.lock().list().join(", ")))
    }

    fn bulk(&self, direction: Direction, password: &str) -> Dispatch {
        let catalog = self.catalog.lock();
        let _claim = match self.in_flight.claim(catalog.targets()) {
            Ok(claim) => claim,
            Err(busy) => return Dispatch::reply(busy_warning(&busy)),
        };
        let report = match direction {
            Direction::Encrypt => catalog.encrypt_all(&self.engine, password),
            Direction::Decrypt => catalog.decrypt_all(&self.engine, password),
        };
        drop(catalog);
        match report {
            Ok(report) => {
                let result = describe_bulk(&report, direction);
                let shutdown_after_reply = direction == Direction::Encrypt
                    && !result.is_error()
                    && self.mode == RouterMode::Normal;
                Dispatch {
                    result,
                    shutdown_after_reply,
                }
            }
            Err(err) => self.failure(err),
        }
    }

    fn failure(&self, err: WardenError) -> Dispatch {
        if err.is_fatal() {
            error!(error = %err, "fatal condition; stopping service");
            self.shutdown.trigger(ShutdownKind::Fatal);
        }
        Dispatch::reply(err.into())
    }
}

fn absolute(raw: &str) -> PathBuf {
    std::path::absolute(raw).unwrap_or_else(|_| PathBuf::from(raw))
}

fn busy_warning(busy: &Path) -> CommandResult {
    warn!(path = %busy.display(), "overlapping transform refused");
    CommandResult::Warning(format!(
        "Another operation is already running on {}; try again when it finishes",
        busy.display()
    ))
}

fn describe_target(report: &TransformReport, direction: Direction) -> CommandResult {
    let root = report.root.display();
    if !report.is_directory {
        return CommandResult::Success(format!("File {root} successfully {}", direction.done()));
    }
    if report.is_clean() {
        return CommandResult::Success(format!(
            "Directory {root} successfully {}",
            direction.done()
        ));
    }
    let problems = report.failures.len() + report.skipped.len();
    let first = report
        .failures
        .first()
        .map(|f| f.error.to_string())
        .or_else(|| {
            report
                .skipped
                .first()
                .map(|p| WardenError::SecurityViolation(p.clone()).to_string())
        })
        .unwrap_or_default();
    CommandResult::Warning(format!(
        "Directory {root} {} with problems: {problems} of {} files not processed ({first})",
        direction.done(),
        report.files_seen()
    ))
}

fn describe_bulk(report: &BulkReport, direction: Direction) -> CommandResult {
    if report.is_clean() {
        return CommandResult::Success(format!(
            "Protected paths list successfully {}",
            direction.done()
        ));
    }
    let problems = report.problems();
    let detail = problems.join("; ");
    if report.all_failed() {
        CommandResult::Error(format!(
            "Protected paths list could not be {}: {detail}",
            direction.done()
        ))
    } else {
        CommandResult::Warning(format!(
            "Protected paths list {} with {} problem(s): {detail}",
            direction.done(),
            problems.len()
        ))
    }
}
