use std::ffi::OsString;
use std::path::PathBuf;

use clap::{ArgAction, Parser};

/// kssh's own flags. Anything after them is handed to ssh untouched.
#[derive(Parser, Debug)]
#[command(
    name = "kssh",
    version,
    about = "ssh with short-lived certificates from your team's CA",
    after_help = "Any arguments after the kssh flags are passed to ssh, e.g.\n  kssh --team acme.ssh.staging -q root@host uptime"
)]
pub struct Cli {
    /// Load a certificate into the running ssh-agent instead of connecting
    #[arg(long)]
    pub provision: bool,

    /// Use this team's CA instead of the default one
    #[arg(long, value_name = "TEAM")]
    pub team: Option<String>,

    /// Remember TEAM as the default for future runs, then exit
    #[arg(long, value_name = "TEAM", conflicts_with = "clear_default_team")]
    pub set_default_team: Option<String>,

    /// Forget the stored default team, then exit
    #[arg(long)]
    pub clear_default_team: bool,

    /// Seconds to wait for the CA to answer
    #[arg(long, env = "KSSH_TIMEOUT", value_name = "SECS", default_value_t = 30)]
    pub timeout: u64,

    /// ssh binary to run
    #[arg(long, env = "KSSH_SSH", value_name = "PATH", default_value = "ssh")]
    pub ssh: PathBuf,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, env = "KSSH_LOG", default_value = "warn")]
    pub log_level: String,

    /// Increase verbosity (--verbose = debug, twice = trace); `-v` goes to ssh
    #[arg(long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Write logs to file (in addition to stderr)
    #[arg(long, env = "KSSH_LOG_FILE", value_name = "PATH")]
    pub log_file: Option<PathBuf>,
}

/// kssh flags that consume the following argument as their value.
const VALUE_FLAGS: &[&str] = &[
    "--team",
    "--set-default-team",
    "--timeout",
    "--ssh",
    "--log-level",
    "--log-file",
];

/// kssh flags that stand alone.
const SWITCH_FLAGS: &[&str] = &[
    "--provision",
    "--clear-default-team",
    "--verbose",
    "--help",
    "-h",
    "--version",
    "-V",
];

/// Split argv into kssh's part (program name included) and ssh's part.
///
/// kssh flags are only recognised at the front; the first argument that
/// is not one of them starts the ssh arguments, so `kssh -q host` and
/// `kssh --team t -o Opt=1 host` both work. `--` ends kssh flags
/// explicitly.
pub fn split_args<I, T>(args: I) -> (Vec<OsString>, Vec<OsString>)
where
    I: IntoIterator<Item = T>,
    T: Into<OsString>,
{
    let mut iter = args.into_iter().map(Into::into);
    let mut own: Vec<OsString> = iter.next().into_iter().collect();
    let mut rest = Vec::new();

    while let Some(arg) = iter.next() {
        let text = arg.to_string_lossy().into_owned();
        if text == "--" {
            break;
        }
        let name = text.split_once('=').map(|(n, _)| n).unwrap_or(text.as_str());
        if VALUE_FLAGS.contains(&name) {
            let inline = name.len() != text.len();
            own.push(arg);
            if !inline {
                if let Some(value) = iter.next() {
                    own.push(value);
                }
            }
        } else if SWITCH_FLAGS.contains(&text.as_str()) {
            own.push(arg);
        } else {
            rest.push(arg);
            break;
        }
    }
    rest.extend(iter);
    (own, rest)
}
