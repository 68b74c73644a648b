use clap::{Parser, Subcommand};

use respawn::internal::launch::install::{
    classify_all, find_kernel_specs, install_on, remove_from, InstallStatus,
};

#[derive(Parser)]
#[command(name = "respawnctl")]
#[command(about = "Install the in-place restart proxy on Jupyter kernelspecs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install the proxy on the named kernelspecs
    Install {
        /// Kernelspec names, as listed by `respawnctl list`
        names: Vec<String>,
    },
    /// Remove the proxy from the named kernelspecs
    Remove {
        /// Kernelspec names, as listed by `respawnctl list`
        names: Vec<String>,
    },
    /// Show the install status of every discovered kernelspec
    List,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let specs = find_kernel_specs();

    match &cli.command {
        Commands::Install { names } => {
            for name in names {
                install_on(name, &specs)?;
            }
        }
        Commands::Remove { names } => {
            for name in names {
                remove_from(name, &specs)?;
            }
        }
        Commands::List => {
            print_list(&specs);
        }
    }

    Ok(())
}

fn print_list(specs: &std::collections::BTreeMap<String, std::path::PathBuf>) {
    let classified = classify_all(specs);

    let of_status = |status: InstallStatus| {
        classified
            .iter()
            .filter(move |(_, s)| *s == status)
            .map(|(name, _)| name.as_str())
            .collect::<Vec<_>>()
    };

    let installed = of_status(InstallStatus::Installed);
    if !installed.is_empty() {
        println!("In-place restarting installed on:");
        for name in &installed {
            println!("  \u{2713} {:?}", name);
        }
        println!();
        println!("Use: respawnctl remove [name [name...]] to remove");
        println!();
    }

    let remote = of_status(InstallStatus::RemoteInstalled);
    if !remote.is_empty() {
        println!("Remote kernels with in-place restarting:");
        for name in &remote {
            println!("  \u{2713} {:?}", name);
        }
        println!();
    }

    let installable = of_status(InstallStatus::Installable);
    if !installable.is_empty() {
        println!("In-place restarting installable on:");
        for name in &installable {
            println!("  - {:?}", name);
        }
        println!();
        println!("Use: respawnctl install [name [name...]] to install");
        println!();
    }

    let unknown = of_status(InstallStatus::Unknown);
    if !unknown.is_empty() {
        println!("Unknown kernel types, does not know how to install:");
        for name in &unknown {
            println!("  \u{2718} {:?}", name);
        }
        println!();
    }
}
