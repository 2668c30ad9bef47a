//! Command-line parsing
//!
//! Short options only: `-n`, `-m <mode>`, `-k <display:mode:plane>` and
//! `-o <file>`. Repeated options take the last value.

use std::ffi::OsString;
use std::path::PathBuf;

use clap::error::{ContextKind, ContextValue, ErrorKind};
use clap::{Arg, ArgAction, ArgMatches, Command};
use thiserror::Error;

use cube_engine::prelude::{CubeConfig, DisplayMode, KhrSelection};

/// Usage text printed after every usage error
pub const USAGE: &str = "\
usage: vkcube [-n] [-o <file>]

  -n                      Don't initialize vt or kms, run headless. This
                          option is equivalent to '-m headless'.

  -m <mode>               Choose display backend, where <mode> is one of
                          \"auto\" (the default), \"headless\", \"khr\",
                          \"kms\", \"wayland\", or \"xcb\". This option is
                          incompatible with '-n'.

  -k <display:mode:plane> Select KHR configuration with 3 number separated
                          by the column character. To display the item
                          corresponding to those number, just omit the number.

  -o <file>               Path to output image when running headless.
                          Default is \"./cube.png\".
";

/// Bad command line
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("usage error: {}\n\n{}", .0, USAGE)]
pub struct UsageError(pub String);

impl UsageError {
    /// The message without the usage text
    pub fn message(&self) -> &str {
        &self.0
    }
}

/// Settings given on the command line; unset fields keep the config's value
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CliArgs {
    /// From `-n` or `-m`
    pub display_mode: Option<DisplayMode>,
    /// From `-k`
    pub khr: Option<KhrSelection>,
    /// From `-o`
    pub output: Option<PathBuf>,
}

impl CliArgs {
    /// Parse `args`, the first of which is the program name
    pub fn parse_from<I, T>(args: I) -> Result<Self, UsageError>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let matches = command().try_get_matches_from(args).map_err(usage_error)?;
        Self::from_matches(&matches)
    }

    fn from_matches(matches: &ArgMatches) -> Result<Self, UsageError> {
        let mode = match matches.get_one::<String>("mode") {
            Some(name) => Some(
                name.parse::<DisplayMode>()
                    .map_err(|_| UsageError("option -m given bad display mode".to_string()))?,
            ),
            None => None,
        };

        let headless = matches.get_flag("headless");
        if headless && mode.is_some() {
            return Err(UsageError("options -n and -m are mutually exclusive".to_string()));
        }

        if matches.contains_id("trailing") {
            return Err(UsageError("trailing args".to_string()));
        }

        Ok(Self {
            display_mode: if headless { Some(DisplayMode::Headless) } else { mode },
            khr: matches.get_one::<String>("khr").map(|spec| KhrSelection::parse(spec)),
            output: matches.get_one::<String>("output").map(PathBuf::from),
        })
    }

    /// Override the matching fields of `config`
    pub fn apply(self, config: &mut CubeConfig) {
        if let Some(mode) = self.display_mode {
            config.display_mode = mode;
        }
        if let Some(khr) = self.khr {
            config.khr = khr;
        }
        if let Some(output) = self.output {
            config.output = output;
        }
    }
}

fn command() -> Command {
    Command::new("vkcube")
        .disable_help_flag(true)
        .disable_version_flag(true)
        .args_override_self(true)
        .arg(
            Arg::new("headless")
                .short('n')
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("mode")
                .short('m')
                .value_name("mode")
                .allow_hyphen_values(true),
        )
        .arg(
            Arg::new("khr")
                .short('k')
                .value_name("display:mode:plane")
                .allow_hyphen_values(true),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .value_name("file")
                .allow_hyphen_values(true),
        )
        .arg(
            Arg::new("trailing")
                .num_args(1..)
                .action(ArgAction::Append)
                .hide(true),
        )
}

/// Flag named by a clap error, e.g. `-x` out of `-x` or `-m <mode>`
fn offending_flag(err: &clap::Error) -> String {
    match err.get(ContextKind::InvalidArg) {
        Some(ContextValue::String(arg)) => arg.split_whitespace().next().unwrap_or(arg).to_string(),
        _ => String::from("-?"),
    }
}

fn usage_error(err: clap::Error) -> UsageError {
    let flag = offending_flag(&err);
    match err.kind() {
        ErrorKind::InvalidValue | ErrorKind::NoEquals => {
            UsageError(format!("option {} requires an argument", flag))
        }
        _ => UsageError(format!("invalid option '{}'", flag)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<CliArgs, UsageError> {
        CliArgs::parse_from(std::iter::once("vkcube").chain(args.iter().copied()))
    }

    #[test]
    fn test_no_args_keeps_config() {
        let args = parse(&[]).unwrap();
        assert_eq!(args, CliArgs::default());

        let mut config = CubeConfig::default();
        args.apply(&mut config);
        assert_eq!(config, CubeConfig::default());
    }

    #[test]
    fn test_headless_flag() {
        let args = parse(&["-n", "-o", "out.png"]).unwrap();
        assert_eq!(args.display_mode, Some(DisplayMode::Headless));
        assert_eq!(args.output, Some(PathBuf::from("out.png")));
    }

    #[test]
    fn test_explicit_mode() {
        assert_eq!(parse(&["-m", "xcb"]).unwrap().display_mode, Some(DisplayMode::Xcb));
        assert_eq!(parse(&["-mkms"]).unwrap().display_mode, Some(DisplayMode::Kms));
    }

    #[test]
    fn test_last_repeated_option_wins() {
        let args = parse(&["-o", "a.png", "-o", "b.png"]).unwrap();
        assert_eq!(args.output, Some(PathBuf::from("b.png")));
    }

    #[test]
    fn test_khr_selection_applies() {
        let mut config = CubeConfig::default();
        parse(&["-m", "khr", "-k", "0:1"]).unwrap().apply(&mut config);

        assert_eq!(config.display_mode, DisplayMode::Khr);
        assert_eq!(config.khr.display, Some(0));
        assert_eq!(config.khr.mode, Some(1));
        assert_eq!(config.khr.plane, None);
    }

    #[test]
    fn test_bad_display_mode() {
        let err = parse(&["-m", "x11"]).unwrap_err();
        assert_eq!(err.message(), "option -m given bad display mode");
    }

    #[test]
    fn test_headless_and_mode_are_exclusive() {
        let err = parse(&["-n", "-m", "headless"]).unwrap_err();
        assert_eq!(err.message(), "options -n and -m are mutually exclusive");
    }

    #[test]
    fn test_trailing_args() {
        let err = parse(&["-n", "extra"]).unwrap_err();
        assert_eq!(err.message(), "trailing args");
    }

    #[test]
    fn test_unknown_option() {
        let err = parse(&["-x"]).unwrap_err();
        assert_eq!(err.message(), "invalid option '-x'");
    }

    #[test]
    fn test_missing_argument() {
        let err = parse(&["-o"]).unwrap_err();
        assert_eq!(err.message(), "option -o requires an argument");
    }

    #[test]
    fn test_error_text_carries_usage() {
        let text = UsageError("trailing args".to_string()).to_string();
        assert!(text.starts_with("usage error: trailing args\n\nusage: vkcube [-n] [-o <file>]\n"));
    }
}
