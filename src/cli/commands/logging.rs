//! Log level and log output format.

use clap::{
    Arg, ArgAction, ArgMatches, Command, ValueEnum,
    builder::{EnumValueParser, PossibleValue, ValueParser},
};
use tracing::Level;

pub const ARG_VERBOSITY: &str = "verbosity";
pub const ARG_LOG_FORMAT: &str = "log-format";

const LEVEL_NAMES: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human readable lines.
    #[default]
    Text,
    /// One JSON object per event, for log shippers.
    Json,
}

impl ValueEnum for LogFormat {
    fn value_variants<'a>() -> &'a [Self] {
        &[Self::Text, Self::Json]
    }

    fn to_possible_value(&self) -> Option<PossibleValue> {
        Some(match self {
            Self::Text => PossibleValue::new("text"),
            Self::Json => PossibleValue::new("json"),
        })
    }
}

/// What `telemetry::init` needs to know about logging.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LogSettings {
    /// `None` keeps the default (errors only).
    pub level: Option<Level>,
    pub format: LogFormat,
}

impl LogSettings {
    #[must_use]
    pub fn from_matches(matches: &ArgMatches) -> Self {
        let verbosity = matches.get_one::<u8>(ARG_VERBOSITY).copied().unwrap_or(0);
        Self {
            level: level_for(verbosity),
            format: matches
                .get_one::<LogFormat>(ARG_LOG_FORMAT)
                .copied()
                .unwrap_or_default(),
        }
    }
}

/// `-v` count to level; the first step is WARN since ERROR is always on.
const fn level_for(verbosity: u8) -> Option<Level> {
    match verbosity {
        0 => None,
        1 => Some(Level::WARN),
        2 => Some(Level::INFO),
        3 => Some(Level::DEBUG),
        _ => Some(Level::TRACE),
    }
}

/// `WARDEN_LOG_LEVEL` takes a level name or the equivalent `-v` count.
fn parse_level(value: &str) -> Result<u8, String> {
    let value = value.trim().to_ascii_lowercase();
    if let Ok(count) = value.parse::<u8>() {
        return if usize::from(count) < LEVEL_NAMES.len() {
            Ok(count)
        } else {
            Err(format!("log level {count} is out of range 0-4"))
        };
    }
    (0u8..)
        .zip(LEVEL_NAMES)
        .find_map(|(count, name)| (name == value).then_some(count))
        .ok_or_else(|| format!("unknown log level {value:?}, expected one of {LEVEL_NAMES:?}"))
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_VERBOSITY)
                .short('v')
                .long("verbose")
                .help("Verbosity level: ERROR, WARN, INFO, DEBUG, TRACE (default: ERROR)")
                .env("WARDEN_LOG_LEVEL")
                .global(true)
                .action(ArgAction::Count)
                .value_parser(ValueParser::new(parse_level)),
        )
        .arg(
            Arg::new(ARG_LOG_FORMAT)
                .long("log-format")
                .help("Log output format")
                .env("WARDEN_LOG_FORMAT")
                .global(true)
                .default_value("text")
                .value_parser(EnumValueParser::<LogFormat>::new()),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_names_and_counts_agree() {
        for (count, name) in (0u8..).zip(LEVEL_NAMES) {
            assert_eq!(parse_level(name), Ok(count));
            assert_eq!(parse_level(&name.to_uppercase()), Ok(count));
            assert_eq!(parse_level(&count.to_string()), Ok(count));
        }
        assert!(parse_level("5").is_err());
        assert!(parse_level("verbose").is_err());
    }

    #[test]
    fn verbosity_maps_to_levels() {
        assert_eq!(level_for(0), None);
        assert_eq!(level_for(1), Some(Level::WARN));
        assert_eq!(level_for(2), Some(Level::INFO));
        assert_eq!(level_for(9), Some(Level::TRACE));
    }

    fn without_env(test: impl FnOnce()) {
        temp_env::with_vars(
            [
                ("WARDEN_LOG_LEVEL", None::<&str>),
                ("WARDEN_LOG_FORMAT", None::<&str>),
            ],
            test,
        );
    }

    #[test]
    fn settings_default_to_quiet_text() {
        without_env(|| {
            let matches = with_args(Command::new("t")).get_matches_from(["t"]);
            assert_eq!(
                LogSettings::from_matches(&matches),
                LogSettings {
                    level: None,
                    format: LogFormat::Text,
                }
            );
        });
    }

    #[test]
    fn settings_read_flags() {
        without_env(|| {
            let matches = with_args(Command::new("t"))
                .get_matches_from(["t", "-vvv", "--log-format", "json"]);
            assert_eq!(
                LogSettings::from_matches(&matches),
                LogSettings {
                    level: Some(Level::DEBUG),
                    format: LogFormat::Json,
                }
            );
            assert!(
                with_args(Command::new("t"))
                    .try_get_matches_from(["t", "--log-format", "xml"])
                    .is_err()
            );
        });
    }

    #[test]
    fn format_from_env() {
        temp_env::with_var("WARDEN_LOG_FORMAT", Some("json"), || {
            let matches = with_args(Command::new("t")).get_matches_from(["t"]);
            assert_eq!(LogSettings::from_matches(&matches).format, LogFormat::Json);
        });
    }
}
