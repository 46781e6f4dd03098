// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

/// Common argument: the recipe file
fn recipe_arg() -> Arg {
    Arg::new("recipe")
        .required(true)
        .value_name("RECIPE")
        .help("Path to the recipe file")
}

/// Flags shared by every command that drives the kitchen
fn kitchen_args() -> Vec<Arg> {
    vec![
        Arg::new("prefix")
            .long("prefix")
            .default_value("/opt/cellar")
            .help("Install prefix (kegs go to <prefix>/<name>/<version>)"),
        Arg::new("cache_dir")
            .long("cache-dir")
            .help("Directory for cached archives"),
        Arg::new("platform")
            .long("platform")
            .help("Platform identifier used to select a bottle (os-arch[-tag])"),
        Arg::new("dep_root")
            .long("dep-root")
            .value_name("DIR")
            .action(ArgAction::Append)
            .help("Additional root searched for build dependencies (repeatable)"),
        Arg::new("build_from_source")
            .long("build-from-source")
            .action(ArgAction::SetTrue)
            .help("Skip bottles and always build from source"),
        Arg::new("force")
            .short('f')
            .long("force")
            .action(ArgAction::SetTrue)
            .help("Replace an installed keg of the same version"),
        Arg::new("jobs")
            .short('j')
            .long("jobs")
            .help("Number of parallel build jobs"),
        Arg::new("build_timeout")
            .long("build-timeout")
            .value_name("SECS")
            .help("Timeout for each build step, in seconds"),
        Arg::new("test_timeout")
            .long("test-timeout")
            .value_name("SECS")
            .help("Timeout for the smoke test, in seconds"),
    ]
}

fn build_cli() -> Command {
    Command::new("cellar")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Cellar Contributors")
        .about("Bottle-first package installer with verified, tested installs")
        .after_help(
            "EXIT STATUS: 0 on success; 10 resolving bottle, 11 using bottle, 12 fetching, \
             13 verifying, 14 patching, 15 building, 16 installing, 17 testing; 1 otherwise.",
        )
        .subcommand_required(false)
        .subcommand(
            Command::new("install")
                .about("Install a package from its recipe (bottle first, then source)")
                .arg(recipe_arg())
                .args(kitchen_args()),
        )
        .subcommand(
            Command::new("test")
                .about("Re-run the smoke test against an installed package")
                .arg(recipe_arg())
                .args(kitchen_args()),
        )
        .subcommand(
            Command::new("fetch")
                .about("Download and verify the source archive into the cache")
                .arg(recipe_arg())
                .args(kitchen_args()),
        )
        .subcommand(
            Command::new("resolve")
                .about("Show whether a bottle would be poured or the source built")
                .arg(recipe_arg())
                .args(kitchen_args()),
        )
        .subcommand(
            Command::new("validate")
                .about("Parse and validate a recipe without touching the prefix")
                .arg(recipe_arg()),
        )
        .subcommand(
            Command::new("completions")
                .about("Generate shell completion scripts")
                .arg(
                    Arg::new("shell")
                        .required(true)
                        .value_parser(["bash", "zsh", "fish", "powershell", "elvish"])
                        .help("Shell type"),
                ),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let manifest_dir = match env::var("CARGO_MANIFEST_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(e) => {
            println!("cargo:warning=CARGO_MANIFEST_DIR not set: {}", e);
            return;
        }
    };
    let man_dir = manifest_dir.join("man");

    if let Err(e) = fs::create_dir_all(&man_dir) {
        println!("cargo:warning=Failed to create man directory: {}", e);
        return;
    }

    let man = Man::new(build_cli());
    let mut buffer = Vec::new();

    if let Err(e) = man.render(&mut buffer) {
        println!("cargo:warning=Failed to render man page: {}", e);
        return;
    }

    let man_path = man_dir.join("cellar.1");
    if let Err(e) = fs::write(&man_path, buffer) {
        println!("cargo:warning=Failed to write man page: {}", e);
    }
}
