//! Launching the helper program of an identity.
//!
use std::{
    collections::BTreeMap,
    process::{Command, Stdio},
    str::FromStr,
    thread,
};

use crate::{DispatchError, InitError};

/// External program launched for an identity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HelperCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl HelperCommand {
    pub fn new(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|arg| arg.to_string()).collect(),
        }
    }
}

/// One `NAME=PROGRAM[,ARG...]` entry of the action table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActionSpec {
    pub identity: String,
    pub command: HelperCommand,
}

impl FromStr for ActionSpec {
    type Err = InitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InitError::InvalidAction(s.to_owned());

        let (identity, command) = s.split_once('=').ok_or_else(invalid)?;
        let mut parts = command.split(',').map(str::trim);
        let program = parts.next().filter(|p| !p.is_empty()).ok_or_else(invalid)?;
        let identity = identity.trim();
        if identity.is_empty() {
            return Err(invalid());
        }

        Ok(Self {
            identity: identity.to_owned(),
            command: HelperCommand {
                program: program.to_owned(),
                args: parts.map(str::to_owned).collect(),
            },
        })
    }
}

/// Identity to helper program mapping.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ActionTable {
    actions: BTreeMap<String, HelperCommand>,
}

impl ActionTable {
    /// The helpers of the two enrolled users.
    pub fn builtin() -> Self {
        [
            ("Eduardo", HelperCommand::new("python", &["du.py"])),
            ("Massaki", HelperCommand::new("python", &["msk.py"])),
        ]
        .into_iter()
        .collect()
    }

    pub fn insert(&mut self, identity: impl Into<String>, command: HelperCommand) {
        self.actions.insert(identity.into(), command);
    }

    pub fn get(&self, identity: &str) -> Option<&HelperCommand> {
        self.actions.get(identity)
    }

    pub fn identities(&self) -> impl Iterator<Item = &str> {
        self.actions.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(S, HelperCommand)> for ActionTable {
    fn from_iter<T: IntoIterator<Item = (S, HelperCommand)>>(iter: T) -> Self {
        Self {
            actions: iter
                .into_iter()
                .map(|(identity, command)| (identity.into(), command))
                .collect(),
        }
    }
}

impl FromIterator<ActionSpec> for ActionTable {
    fn from_iter<T: IntoIterator<Item = ActionSpec>>(iter: T) -> Self {
        iter.into_iter()
            .map(|spec| (spec.identity, spec.command))
            .collect()
    }
}

/// Side effect run for a granted identity.
pub trait ActionDispatcher {
    fn dispatch(&self, identity: &str) -> Result<(), DispatchError>;
}

/// Launches helper programs as detached child processes.
pub struct ProcessDispatcher {
    table: ActionTable,
}

impl ProcessDispatcher {
    pub fn new(table: ActionTable) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &ActionTable {
        &self.table
    }
}

impl ActionDispatcher for ProcessDispatcher {
    fn dispatch(&self, identity: &str) -> Result<(), DispatchError> {
        let helper = self
            .table
            .get(identity)
            .ok_or_else(|| DispatchError::Unregistered(identity.to_owned()))?;

        let mut child = Command::new(&helper.program)
            .args(&helper.args)
            .stdin(Stdio::null())
            .spawn()
            .map_err(|source| DispatchError::Launch {
                identity: identity.to_owned(),
                program: helper.program.clone(),
                source,
            })?;

        log::info!(
            "Launched {} {:?} for {} (pid {})",
            helper.program,
            helper.args,
            identity,
            child.id()
        );

        // Reap the child in the background so it does not linger as a zombie
        let program = helper.program.clone();
        thread::spawn(move || match child.wait() {
            Ok(status) => log::debug!("Helper {} exited with {}", program, status),
            Err(err) => log::warn!("Could not wait for helper {}: {}", program, err),
        });

        Ok(())
    }
}
