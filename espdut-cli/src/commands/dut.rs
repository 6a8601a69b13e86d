//! Commands that operate on the board: flash, reset, erase, dump.

use anyhow::{Context, Result};
use console::style;
use espdut::{
    AppDescriptor, DumpTarget, DutSession, NativePort, PartitionTable, Port, StartOptions, find_dut,
};
use std::path::Path;
use std::sync::Arc;

use crate::config::Config;
use crate::{AppArgs, Cli, baud_rates, candidate_ports, esptool, spinner};

/// Console baud rate the session holds the port at between operations.
const CONSOLE_BAUD: u32 = 115_200;

/// Load the app descriptor named by `--build-dir` / `--partition-table`.
///
/// Without a build directory the descriptor has nothing to flash, which is
/// fine for erase and dump.
fn load_app(args: &AppArgs) -> Result<AppDescriptor> {
    let app = match &args.build_dir {
        Some(dir) => AppDescriptor::from_build_dir(dir)
            .with_context(|| format!("Failed to load build from {}", dir.display()))?,
        None => AppDescriptor::new(Vec::new(), Arc::default()),
    };

    match &args.partition_table {
        Some(path) => {
            let table = PartitionTable::from_file(path)
                .with_context(|| format!("Failed to load partition table {}", path.display()))?;
            Ok(app.with_partition_table(Arc::new(table)))
        },
        None => Ok(app),
    }
}

/// Find the board and open a session on it.
fn open_session(cli: &Cli, config: &Config, app: AppDescriptor) -> Result<DutSession<NativePort>> {
    let candidates = candidate_ports(cli, config)?;
    let mut esptool = esptool(cli, config);

    let pb = spinner(cli, format!("Probing {} port(s)...", candidates.len()));
    let found = find_dut(&mut esptool, &candidates);
    pb.finish_and_clear();
    let (port_name, chip) = found?;

    if !cli.quiet {
        eprintln!(
            "{} Found {} on {}",
            style("✓").green(),
            style(&chip).yellow(),
            style(&port_name).cyan()
        );
    }

    let port = NativePort::open_simple(&port_name, CONSOLE_BAUD)
        .with_context(|| format!("Failed to open {port_name}"))?;
    Ok(DutSession::new(port, app, esptool))
}

fn done(cli: &Cli, message: &str) {
    if !cli.quiet {
        eprintln!("{} {}", style("✓").green().bold(), message);
    }
}

/// Flash command implementation.
pub(crate) fn cmd_flash(
    cli: &Cli,
    config: &Config,
    build_dir: &Path,
    partition_table: Option<&Path>,
    no_erase_nvs: bool,
) -> Result<()> {
    let app = load_app(&AppArgs {
        build_dir: Some(build_dir.to_path_buf()),
        partition_table: partition_table.map(Path::to_path_buf),
    })?;

    let options = StartOptions {
        erase_nvs: !no_erase_nvs && config.flash.erase_nvs.unwrap_or(true),
        baud_rates: baud_rates(cli, config),
    };

    let mut session = open_session(cli, config, app)?;
    let pb = spinner(cli, format!("Flashing {}...", session.port().name()));
    let result = session.start_app(&options);
    pb.finish_and_clear();
    result?;

    done(cli, "Flash complete");
    Ok(())
}

/// Reset command implementation.
pub(crate) fn cmd_reset(cli: &Cli, config: &Config) -> Result<()> {
    let app = load_app(&AppArgs::default())?;
    let mut session = open_session(cli, config, app)?;
    session.reset()?;

    done(cli, "Board reset");
    Ok(())
}

/// Erase-partition command implementation.
pub(crate) fn cmd_erase_partition(cli: &Cli, config: &Config, name: &str, app: &AppArgs) -> Result<()> {
    let app = load_app(app)?;
    // Unknown names fail before any port is touched.
    app.partition_table().require(name)?;

    let mut session = open_session(cli, config, app)?;
    let pb = spinner(cli, format!("Erasing partition '{name}'..."));
    let result = session.erase_partition(name);
    pb.finish_and_clear();
    result?;

    done(cli, &format!("Erased partition '{name}'"));
    Ok(())
}

/// Dump-flash command implementation.
pub(crate) fn cmd_dump_flash(
    cli: &Cli,
    config: &Config,
    output: &Path,
    partition: Option<&str>,
    address: Option<u32>,
    size: Option<u32>,
    app: &AppArgs,
) -> Result<()> {
    let target = DumpTarget::from_parts(partition, address, size)?;
    let app = load_app(app)?;
    let (_, length) = target.resolve(app.partition_table())?;

    let mut session = open_session(cli, config, app)?;
    let pb = spinner(cli, format!("Reading {length} bytes..."));
    let result = session.dump_flash(output, &target);
    pb.finish_and_clear();
    result?;

    done(cli, &format!("Saved {length} bytes to {}", output.display()));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_load_app_without_build_dir_is_empty() {
        let app = load_app(&AppArgs::default()).unwrap();
        assert!(app.download_config().is_empty());
        assert!(app.partition_table().is_empty());
    }

    #[test]
    fn test_load_app_partition_table_override() {
        let dir = tempdir().unwrap();
        let csv = dir.path().join("partitions.csv");
        fs::write(&csv, "nvs, data, nvs, 0x9000, 0x6000,\n").unwrap();

        let app = load_app(&AppArgs {
            build_dir: None,
            partition_table: Some(csv),
        })
        .unwrap();

        let nvs = app.partition_table().require("nvs").unwrap();
        assert_eq!((nvs.offset, nvs.size), (0x9000, 0x6000));
    }

    #[test]
    fn test_load_app_missing_build_dir_keeps_library_error() {
        let dir = tempdir().unwrap();
        let err = load_app(&AppArgs {
            build_dir: Some(dir.path().join("nope")),
            partition_table: None,
        })
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<espdut::Error>(),
            Some(espdut::Error::Config(_))
        ));
    }
}
