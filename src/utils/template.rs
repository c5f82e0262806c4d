// dbbackup/src/utils/template.rs
use regex::{Captures, Regex};
use std::collections::HashMap;
use std::sync::LazyLock;

pub const REDACTION_MARKER: &str = "***";

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{([a-z_]+)\}\}").expect("placeholder pattern is valid"));

/// Names a template may reference as `{{name}}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Placeholder {
    Host,
    User,
    Password,
    DbName,
    BackupFilepath,
    SourceFilepath,
    DestFilepath,
    ExtraParams,
}

impl Placeholder {
    fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "host" => Placeholder::Host,
            "user" => Placeholder::User,
            "password" => Placeholder::Password,
            "db_name" => Placeholder::DbName,
            "backup_filepath" => Placeholder::BackupFilepath,
            "source_filepath" => Placeholder::SourceFilepath,
            "dest_filepath" => Placeholder::DestFilepath,
            "extra_params" => Placeholder::ExtraParams,
            _ => return None,
        })
    }

    fn is_credential(self) -> bool {
        matches!(self, Placeholder::User | Placeholder::Password)
    }
}

/// The two forms of a rendered command: one to execute, one to log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedCommand {
    pub executable: String,
    pub loggable: String,
}

/// A command line with `{{name}}` placeholders.
#[derive(Debug, Clone, Copy)]
pub struct CommandTemplate(&'static str);

impl CommandTemplate {
    pub const fn new(template: &'static str) -> Self {
        CommandTemplate(template)
    }

    /// Substitutes every recognized placeholder in a single pass. Missing
    /// values render empty; unknown tokens are kept verbatim.
    pub fn render(&self, values: &HashMap<Placeholder, String>) -> RenderedCommand {
        let executable = self.substitute(|p| values.get(&p).map(String::as_str).unwrap_or(""));
        let redacted = self.substitute(|p| {
            if p.is_credential() {
                REDACTION_MARKER
            } else {
                values.get(&p).map(String::as_str).unwrap_or("")
            }
        });

        let secrets: Vec<&str> = [Placeholder::Password, Placeholder::User]
            .iter()
            .filter_map(|p| values.get(p))
            .map(String::as_str)
            .filter(|v| !v.is_empty() && !REDACTION_MARKER.contains(v))
            .collect();

        RenderedCommand {
            executable,
            loggable: scrub(redacted, &secrets),
        }
    }

    fn substitute<'a>(&self, lookup: impl Fn(Placeholder) -> &'a str) -> String {
        PLACEHOLDER
            .replace_all(self.0, |caps: &Captures| match Placeholder::parse(&caps[1]) {
                Some(p) => lookup(p).to_string(),
                None => caps[0].to_string(),
            })
            .into_owned()
    }
}

/// Replaces every secret with the marker until none is left. A replacement
/// can splice a new occurrence out of marker text, so one pass is not enough.
/// Each round drops a non-`*` character or shortens the line, so this ends.
fn scrub(mut line: String, secrets: &[&str]) -> String {
    while let Some(secret) = secrets.iter().find(|s| line.contains(**s)) {
        line = line.replace(*secret, REDACTION_MARKER);
    }
    line
}
