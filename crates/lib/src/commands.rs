//! Chat command classification: map inbound text to a fixed command vocabulary.

/// Commands the bot answers. Anything else is `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    YourId,
    Start,
    Integration,
    Help,
    Unknown,
}

/// Alias table, checked in order; first match wins. Aliases are stored lowercase.
const ALIASES: &[(Command, &[&str])] = &[
    (Command::YourId, &["ваш id", "id", "мой id", "/id"]),
    (Command::Start, &["/start"]),
    (Command::Integration, &["интеграция", "integration", "/integration"]),
    (Command::Help, &["помощь", "help", "/help"]),
];

impl Command {
    /// Classify raw message text (case-insensitive, exact alias match).
    pub fn classify(text: &str) -> Self {
        let normalized = text.to_lowercase();
        ALIASES
            .iter()
            .find(|(_, aliases)| aliases.iter().any(|a| *a == normalized))
            .map(|(cmd, _)| *cmd)
            .unwrap_or(Command::Unknown)
    }

    pub fn name(self) -> &'static str {
        match self {
            Command::YourId => "your_id",
            Command::Start => "start",
            Command::Integration => "integration",
            Command::Help => "help",
            Command::Unknown => "unknown",
        }
    }
}
