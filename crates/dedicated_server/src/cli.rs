//! Command-line interface handling for the dedicated server.

use clap::{value_parser, Arg, ArgMatches, Command};
use std::path::PathBuf;

/// Command line arguments parsed from user input.
///
/// Every option except the config path overrides the matching setting of
/// the configuration file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliArgs {
    /// Path to the configuration file
    pub config_path: PathBuf,
    /// Optional override for the plugin home directory
    pub plugin_home: Option<PathBuf>,
    /// Optional override for the bind address
    pub address: Option<String>,
    /// Optional override for the port
    pub port: Option<u16>,
    /// Optional override for log level
    pub log_level: Option<String>,
    /// Whether to force JSON log output
    pub json_logs: bool,
}

/// The clap command definition.
pub fn command() -> Command {
    Command::new("Dedicated Server")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Dedicated multiplayer server with scriptable game logic")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("config.toml"),
        )
        .arg(
            Arg::new("plugins")
                .short('p')
                .long("plugins")
                .value_name("DIR")
                .help("Plugin home directory; scripts are loaded from its scripts folder"),
        )
        .arg(
            Arg::new("address")
                .short('a')
                .long("address")
                .value_name("IP")
                .help("Numeric address to bind (e.g., 0.0.0.0)"),
        )
        .arg(
            Arg::new("port")
                .long("port")
                .value_name("PORT")
                .help("Port to listen on")
                .value_parser(value_parser!(u16)),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("Log level (trace, debug, info, warn, error)"),
        )
        .arg(
            Arg::new("json-logs")
                .long("json-logs")
                .help("Output logs in JSON format")
                .action(clap::ArgAction::SetTrue),
        )
}

impl CliArgs {
    /// Parses the process arguments, exiting with usage on error.
    pub fn parse() -> Self {
        Self::from_matches(&command().get_matches())
    }

    /// Parses an explicit argument list.
    pub fn try_parse_from<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        Ok(Self::from_matches(&command().try_get_matches_from(args)?))
    }

    fn from_matches(matches: &ArgMatches) -> Self {
        Self {
            config_path: matches
                .get_one::<String>("config")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("config.toml")),
            plugin_home: matches.get_one::<String>("plugins").map(PathBuf::from),
            address: matches.get_one::<String>("address").cloned(),
            port: matches.get_one::<u16>("port").copied(),
            log_level: matches.get_one::<String>("log-level").cloned(),
            json_logs: matches.get_flag("json-logs"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = CliArgs::try_parse_from(["dedicated_server"]).unwrap();
        assert_eq!(args.config_path, PathBuf::from("config.toml"));
        assert_eq!(args.plugin_home, None);
        assert_eq!(args.port, None);
        assert!(!args.json_logs);
    }

    #[test]
    fn test_overrides() {
        let args = CliArgs::try_parse_from([
            "dedicated_server",
            "--config",
            "prod.toml",
            "-p",
            "/srv/game",
            "--address",
            "127.0.0.1",
            "--port",
            "25566",
            "-l",
            "debug",
            "--json-logs",
        ])
        .unwrap();
        assert_eq!(args.config_path, PathBuf::from("prod.toml"));
        assert_eq!(args.plugin_home, Some(PathBuf::from("/srv/game")));
        assert_eq!(args.address.as_deref(), Some("127.0.0.1"));
        assert_eq!(args.port, Some(25566));
        assert_eq!(args.log_level.as_deref(), Some("debug"));
        assert!(args.json_logs);
    }

    #[test]
    fn test_rejects_bad_port() {
        assert!(CliArgs::try_parse_from(["dedicated_server", "--port", "70000"]).is_err());
    }
}
