use std::env;
use std::fs;
use std::io;

use clap::CommandFactory;
use clap_complete::Shell;

// Brings `Cli` and `std::path::PathBuf` into scope
include!("src/cli.rs");

fn main() -> io::Result<()> {
    println!("cargo:rerun-if-changed=src/cli.rs");

    let Some(out_dir) = env::var_os("OUT_DIR") else {
        return Ok(());
    };
    let out_dir = PathBuf::from(out_dir);

    let mut cmd = Cli::command();

    let man = clap_mangen::Man::new(cmd.clone());
    let mut page = Vec::new();
    man.render(&mut page)?;
    fs::write(out_dir.join("debprov.1"), page)?;

    let completions = out_dir.join("completions");
    fs::create_dir_all(&completions)?;
    for shell in [Shell::Bash, Shell::Zsh, Shell::Fish] {
        clap_complete::generate_to(shell, &mut cmd, "debprov", &completions)?;
    }

    Ok(())
}
