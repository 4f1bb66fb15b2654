use std::process::ExitCode;

use clap::Parser;

mod cli;
mod config;
mod dispatch;
mod helper;
mod logging;
mod render;

use cli::Cli;

fn main() -> ExitCode {
    let cli = Cli::parse();
    let args = std::env::args_os().skip(1).collect::<Vec<_>>();
    let code = dispatch::run_cli(cli, args);
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

#[cfg(test)]
mod tests;
