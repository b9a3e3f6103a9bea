use clap::{ColorChoice, Parser};
use colored::Colorize;
use dvrgrab::{
    commands::{Args, Commands},
    logger,
};
use std::{
    io::{IsTerminal, stderr},
    process,
};

fn run() -> anyhow::Result<()> {
    let args = Args::parse();

    match args.color {
        ColorChoice::Always => colored::control::set_override(true),
        ColorChoice::Auto => {
            if !stderr().is_terminal() {
                colored::control::set_override(false);
            }
        }
        ColorChoice::Never => colored::control::set_override(false),
    }

    logger::init(args.verbose)?;

    match args.command {
        Commands::Archive(args) => args.execute()?,
        Commands::Decode(args) => args.execute()?,
        Commands::List(args) => args.execute()?,
    }

    Ok(())
}

fn main() {
    if let Err(e) = run() {
        eprintln!("{}: {:#}", "error".bold().red(), e);
        process::exit(1);
    }
}
