//! Interactive program detection

use std::collections::HashSet;

/// Decides whether a command needs a pseudo-terminal
///
/// A command is interactive when its program name (the first word, ignoring a
/// leading `sudo` with its options and any directory part) is in the configured list.
#[derive(Debug, Clone)]
pub struct InteractiveClassifier {
    programs: HashSet<String>,
}

impl InteractiveClassifier {
    pub fn new<I, S>(programs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            programs: programs.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_interactive(&self, command: &str) -> bool {
        program_name(command).is_some_and(|name| self.programs.contains(name))
    }
}

/// sudo options whose value is the following word
const SUDO_VALUE_OPTIONS: &[&str] = &["-u", "-g", "-C", "-h", "-p", "-r", "-t", "-D", "-R", "-T", "-U"];

fn program_name(command: &str) -> Option<&str> {
    let mut words = command.split_whitespace();
    let mut first = words.next()?;
    if first == "sudo" {
        first = loop {
            let word = words.next()?;
            if word == "--" {
                break words.next()?;
            }
            if SUDO_VALUE_OPTIONS.contains(&word) {
                words.next()?;
            } else if !word.starts_with('-') {
                break word;
            }
        };
    }
    first.rsplit('/').next()
}
