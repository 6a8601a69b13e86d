//! Port listing and board discovery.

use anyhow::Result;
use console::style;
use espdut::select::{Platform, resolve_hint, select_ports};
use espdut::{DeviceKind, NativePortEnumerator, PortEnumerator, PortInfo, describe_port, find_dut};

use crate::config::Config;
use crate::{Cli, candidate_ports, esptool, port_hint, spinner};

fn port_json(port: &PortInfo) -> serde_json::Value {
    let kind = DeviceKind::of(port);
    serde_json::json!({
        "name": port.name,
        "device": kind.name(),
        "known": kind.is_known(),
        "vid": port.vid,
        "pid": port.pid,
        "manufacturer": port.manufacturer,
        "product": port.product,
        "serial": port.serial_number,
    })
}

/// Port the hint moved to the front of the probe order, if any.
fn hinted_port<'a>(names: &'a [String], hint: Option<&str>, platform: Platform) -> Option<&'a str> {
    hint.filter(|h| !h.is_empty())
        .and_then(|h| resolve_hint(names, h, platform))
}

/// List ports in probe order. Ports that would be skipped are shown last.
pub(crate) fn cmd_list_ports(cli: &Cli, config: &Config, json: bool) -> Result<()> {
    let ports = NativePortEnumerator::list_ports()?;
    let names: Vec<String> = ports.iter().map(|p| p.name.clone()).collect();
    let hint = port_hint(cli, config);
    let platform = Platform::current();
    let ordered = select_ports(&names, hint.as_deref(), platform);
    let hinted = hinted_port(&names, hint.as_deref(), platform);

    let lookup = |name: &str| ports.iter().find(|p| p.name == name);

    if json {
        let entries: Vec<serde_json::Value> = ordered
            .iter()
            .filter_map(|name| lookup(name))
            .map(port_json)
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    eprintln!("{}", style("Serial ports (probe order)").bold().underlined());

    if ordered.is_empty() {
        eprintln!("  {}", style("No usable serial ports found").dim());
    }

    for (i, name) in ordered.iter().enumerate() {
        let line = lookup(name).map_or_else(|| name.clone(), describe_port);
        let marker = if i == 0 && hinted == Some(name.as_str()) {
            style("→").green().bold()
        } else {
            style("•").green()
        };
        eprintln!("  {} {}", marker, style(line).cyan());
    }

    for name in names.iter().filter(|n| !ordered.contains(*n)) {
        eprintln!("  {} {} {}", style("×").dim(), style(name).dim(), style("(skipped)").dim());
    }

    Ok(())
}

/// Probe candidate ports and report the first chip found.
pub(crate) fn cmd_chip_id(cli: &Cli, config: &Config, json: bool) -> Result<()> {
    let candidates = candidate_ports(cli, config)?;
    let mut esptool = esptool(cli, config);

    let pb = spinner(cli, format!("Probing {} port(s)...", candidates.len()));
    let found = find_dut(&mut esptool, &candidates);
    pb.finish_and_clear();
    let (port, chip) = found?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({ "port": port, "chip": chip }))?
        );
    } else {
        println!("{port}\t{chip}");
    }

    Ok(())
}
