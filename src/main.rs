// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use melvin::dm::production::DmMapper;
use melvin::dm::DevManager;
use melvin::flock::{Flock, LockScope};
use melvin::parser::Entry;
use melvin::pvlabel::PvHeader;
use melvin::vg::VG;

#[derive(Parser)]
#[clap(name = "mlv", about = "Activate and deactivate logical volumes")]
struct Cli {
    /// Path to a PV belonging to the volume group to operate on.
    #[clap(long, value_name = "PATH")]
    pv: PathBuf,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Activate a logical volume's mapper devices.
    Activate { lv: String },
    /// Deactivate a logical volume's mapper devices.
    Deactivate { lv: String },
    /// Print what the planner currently knows about a logical volume.
    Info { lv: String },
}

fn load_vg(pv_path: &PathBuf) -> Result<VG> {
    let pvh = PvHeader::find_in_dev(pv_path).context("reading PV label")?;
    let disk_map = pvh.read_metadata().context("reading VG metadata")?;

    let (vg_name, vg_map) = disk_map
        .iter()
        .find_map(|(k, v)| match v {
            Entry::TextMap(m) => Some((k.clone(), m)),
            _ => None,
        })
        .context("no volume group metadata found on PV")?;

    Ok(VG::from_textmap(&vg_name, vg_map)?)
}

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let vg = load_vg(&cli.pv)?;

    let _lock = Flock::lock_exclusive(LockScope::VG(vg.name().to_string())).context("locking volume group")?;

    let mapper = DmMapper::new().context("opening device-mapper control device")?;
    let mut manager = DevManager::new(vg.name(), mapper);

    match cli.command {
        Command::Activate { lv } => {
            manager.activate(&vg, &lv).with_context(|| format!("activating {}", lv))?;
            println!("activated {}/{}", vg.name(), lv);
        }
        Command::Deactivate { lv } => {
            manager
                .deactivate(&vg, &lv)
                .with_context(|| format!("deactivating {}", lv))?;
            println!("deactivated {}/{}", vg.name(), lv);
        }
        Command::Info { lv } => match manager.info(&lv) {
            Some(layer) => println!("{:#?}", layer),
            None => println!("{} has no computed layer yet", lv),
        },
    }

    Ok(())
}
