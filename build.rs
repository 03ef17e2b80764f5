//! Build script rendering the demo binary's manual page from its clap
//! definition.
//!
//! The page lands in `$OUT_DIR`, or in `INTERCEPTOR_CHAIN_MAN_DIR` when
//! packagers want it somewhere stable.

use std::{env, fs, path::PathBuf};

use clap::CommandFactory;
use clap_mangen::Man;

#[path = "src/cli.rs"]
mod cli;

const MAN_DIR_VAR: &str = "INTERCEPTOR_CHAIN_MAN_DIR";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed=src/cli.rs");
    println!("cargo:rerun-if-env-changed={MAN_DIR_VAR}");

    let man_dir = match env::var_os(MAN_DIR_VAR) {
        Some(dir) => PathBuf::from(dir),
        None => PathBuf::from(env::var_os("OUT_DIR").ok_or("OUT_DIR not set")?).join("man"),
    };
    fs::create_dir_all(&man_dir)?;

    let cmd = cli::Cli::command();
    let page = man_dir.join(format!("{}.1", cmd.get_name()));
    let mut buf = Vec::new();
    Man::new(cmd).render(&mut buf)?;
    fs::write(&page, buf)?;

    Ok(())
}
