//! Event printing, colored or as newline-delimited JSON

use owo_colors::OwoColorize;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::ffi::OsString;
use std::path::Path;
use watcher::Event;

/// One line of output
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Record {
    Ready {
        path: String,
        children: usize,
        watched_directories: usize,
    },
    Event {
        event: Event,
        /// `None` for the observed path itself
        child: Option<String>,
    },
    Batch {
        self_changed: bool,
        changes: BTreeMap<String, Event>,
    },
    Incomplete {
        reason: String,
    },
    Reconciled {
        changes: BTreeMap<String, Event>,
    },
    Closed {
        reason: String,
    },
}

impl Record {
    pub fn ready(path: &Path, children: usize, watched_directories: usize) -> Self {
        Record::Ready {
            path: path.display().to_string(),
            children,
            watched_directories,
        }
    }

    pub fn event(event: Event, child: Option<&OsString>) -> Self {
        Record::Event {
            event,
            child: child.map(|name| name.to_string_lossy().into_owned()),
        }
    }

    pub fn batch(self_changed: bool, changes: &HashMap<OsString, Event>) -> Self {
        Record::Batch {
            self_changed,
            changes: sorted(changes),
        }
    }

    pub fn reconciled(changes: &HashMap<OsString, Event>) -> Self {
        Record::Reconciled {
            changes: sorted(changes),
        }
    }
}

fn sorted(changes: &HashMap<OsString, Event>) -> BTreeMap<String, Event> {
    changes
        .iter()
        .map(|(name, event)| (name.to_string_lossy().into_owned(), *event))
        .collect()
}

pub struct Printer {
    json: bool,
}

impl Printer {
    pub fn new(json: bool) -> Self {
        Self { json }
    }

    pub fn print(&self, record: &Record) -> anyhow::Result<()> {
        if self.json {
            println!("{}", serde_json::to_string(record)?);
        } else {
            for line in human(record) {
                println!("{}", line);
            }
        }
        Ok(())
    }
}

fn human(record: &Record) -> Vec<String> {
    match record {
        Record::Ready {
            path,
            children,
            watched_directories,
        } => vec![format!(
            "Watching {} ({} entries, {} directories)",
            path.cyan(),
            children,
            watched_directories
        )],
        Record::Event { event, child } => {
            vec![event_line(*event, child.as_deref().unwrap_or("."))]
        }
        Record::Batch {
            self_changed,
            changes,
        } => {
            let mut lines = Vec::new();
            if *self_changed {
                lines.push(event_line(Event::Modify, "."));
            }
            lines.extend(changes.iter().map(|(name, event)| event_line(*event, name)));
            lines
        }
        Record::Incomplete { reason } => {
            vec![format!("{} {}", "incomplete:".yellow().bold(), reason)]
        }
        Record::Reconciled { changes } => changes
            .iter()
            .map(|(name, event)| format!("{} {}", event_line(*event, name), "(rescan)".dimmed()))
            .collect(),
        Record::Closed { reason } => vec![format!("{} {}", "closed:".bold(), reason)],
    }
}

fn event_line(event: Event, name: &str) -> String {
    let label = match event {
        Event::Create => "CREATE".green().to_string(),
        Event::Delete => "DELETE".red().to_string(),
        Event::Modify => "MODIFY".yellow().to_string(),
    };
    format!("{:>6} {}", label, name)
}
