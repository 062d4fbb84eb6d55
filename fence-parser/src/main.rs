use std::env;
use std::fs;
use std::io::{self, Read};
use std::process::ExitCode;

use fence_parser::{parse_blocks, TrailingPolicy};

const NAME: &str = env!("CARGO_PKG_NAME");

/// What the command line asked for.
enum Action {
    Help,
    Version,
    Parse {
        source: Option<String>,
        policy: TrailingPolicy,
    },
}

/// Usage problems exit with 2, I/O problems with 1.
enum Failure {
    Usage(String),
    Io(String),
}

fn main() -> ExitCode {
    let outcome = parse_args(env::args().skip(1)).and_then(|action| match action {
        Action::Help => {
            println!("{}", help());
            Ok(())
        }
        Action::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Action::Parse { source, policy } => print_blocks(source.as_deref(), policy),
    });
    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(Failure::Usage(msg)) => {
            eprintln!("{NAME}: {msg}\n\n{}", help());
            ExitCode::from(2)
        }
        Err(Failure::Io(msg)) => {
            eprintln!("{NAME}: {msg}");
            ExitCode::from(1)
        }
    }
}

fn parse_args(args: impl Iterator<Item = String>) -> Result<Action, Failure> {
    let mut source = None;
    let mut policy = TrailingPolicy::Flush;
    for arg in args {
        match arg.as_str() {
            "-h" | "--help" => return Ok(Action::Help),
            "-V" | "--version" => return Ok(Action::Version),
            "--discard-trailing" => policy = TrailingPolicy::Discard,
            _ if source.is_some() => {
                return Err(Failure::Usage(format!("unexpected argument: {arg}")));
            }
            "-" => source = Some(None),
            path => source = Some(Some(path.to_string())),
        }
    }
    Ok(Action::Parse {
        source: source.flatten(),
        policy,
    })
}

/// Reads the reply from `path`, or stdin when it is `None`.
fn print_blocks(path: Option<&str>, policy: TrailingPolicy) -> Result<(), Failure> {
    let reply = match path {
        Some(path) => fs::read_to_string(path)
            .map_err(|err| Failure::Io(format!("failed to read '{path}': {err}")))?,
        None => {
            let mut buf = String::new();
            io::stdin()
                .read_to_string(&mut buf)
                .map_err(|err| Failure::Io(format!("failed to read stdin: {err}")))?;
            buf
        }
    };
    let json = serde_json::to_string_pretty(&parse_blocks(&reply, policy))
        .map_err(|err| Failure::Io(format!("failed to serialize JSON: {err}")))?;
    println!("{json}");
    Ok(())
}

fn help() -> String {
    format!(
        "Usage: {NAME} [--discard-trailing] [REPLY_FILE|-]\n\n\
         Prints the fenced blocks of an LLM reply as JSON; stdin is read when no file is given.\n\n\
         Options:\n  \
         --discard-trailing  Drop held characters of an unterminated block\n  \
         -h, --help          Show this message\n  \
         -V, --version       Print package version"
    )
}
