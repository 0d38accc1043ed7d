#![deny(unsafe_code)]

use std::env;
use std::process::ExitCode;

fn main() -> ExitCode {
    exodus_cli::run_with(env::args_os())
}
