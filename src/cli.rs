//! The `boom` command line front end.

use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use clap::Parser;
use fn_error_context::context;
use log::LevelFilter;

use crate::bootloader::{parse_btrfs_subvol, BootParams};
use crate::config::BoomConfig;
use crate::context::{BoomContext, DEFAULT_GRUB1_DEVICE};
use crate::hostprofile::HostProfile;
use crate::mounts::{parse_mount_units, parse_swap_units};
use crate::osprofile::OsProfile;
use crate::profile::Profile;
use crate::selection::Selection;

/// `boom` sub-commands.
#[derive(Debug, Parser)]
#[clap(name = "boom", about = "Boot Loader Specification entry manager", version)]
pub struct BoomCommand {
    /// Verbosity level (higher is more verbose).
    #[clap(short = 'v', action = clap::ArgAction::Count, global = true)]
    verbosity: u8,

    /// Path to the boot file system to operate on.
    #[clap(long, global = true, default_value = "/boot")]
    boot_dir: Utf8PathBuf,

    /// CLI sub-command.
    #[clap(subcommand)]
    pub cmd: BoomVerb,
}

impl BoomCommand {
    /// Return the log-level set via command-line flags.
    pub fn loglevel(&self) -> LevelFilter {
        match self.verbosity {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }
}

/// CLI sub-commands.
#[derive(Debug, Parser)]
pub enum BoomVerb {
    #[clap(name = "entry", subcommand, about = "Manage boot entries")]
    Entry(EntryVerb),
    #[clap(name = "profile", subcommand, about = "Manage OS profiles")]
    Profile(ProfileVerb),
    #[clap(name = "host", subcommand, about = "Manage host profiles")]
    Host(HostVerb),
    #[clap(name = "cache", subcommand, about = "Manage the boot image cache")]
    Cache(CacheVerb),
    #[clap(name = "legacy", subcommand, about = "Manage legacy bootloader configuration")]
    Legacy(LegacyVerb),
    #[clap(name = "config", subcommand, about = "Manage boom configuration")]
    Config(ConfigVerb),
}

#[derive(Debug, Parser)]
pub enum EntryVerb {
    #[clap(name = "list", about = "List boot entries")]
    List(SelectionOpts),
    #[clap(name = "create", about = "Create a new boot entry")]
    Create(EntryCreateOpts),
    #[clap(name = "delete", about = "Delete boot entries")]
    Delete(SelectionOpts),
    #[clap(name = "show", about = "Show boot entries in BLS notation")]
    Show(SelectionOpts),
}

#[derive(Debug, Parser, Default)]
pub struct SelectionOpts {
    /// The boot identifier (prefix) to match.
    #[clap(long)]
    boot_id: Option<String>,
    /// The entry version to match.
    #[clap(long)]
    version: Option<String>,
    /// The machine id to match.
    #[clap(long)]
    machine_id: Option<String>,
    /// The entry title to match.
    #[clap(long)]
    title: Option<String>,
    /// The OS profile identifier (prefix) to match.
    #[clap(long)]
    profile: Option<String>,
}

impl SelectionOpts {
    fn to_selection(&self) -> Selection {
        Selection {
            boot_id: self.boot_id.clone(),
            version: self.version.clone(),
            machine_id: self.machine_id.clone(),
            title: self.title.clone(),
            os_id: self.profile.clone(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Parser)]
pub struct EntryCreateOpts {
    /// The kernel version to boot.
    #[clap(long)]
    version: String,
    /// The entry title.
    #[clap(long)]
    title: Option<String>,
    /// The machine id of the entry.
    #[clap(long, default_value = "")]
    machine_id: String,
    /// The OS profile identifier (prefix) to use.
    #[clap(long)]
    profile: Option<String>,
    /// The root device for the entry.
    #[clap(long)]
    root_device: Option<String>,
    /// The LVM2 root logical volume (vg/lv).
    #[clap(long)]
    root_lv: Option<String>,
    /// A BTRFS subvolume path or id.
    #[clap(long)]
    btrfs_subvolume: Option<String>,
    /// Additional kernel options to append.
    #[clap(long)]
    add_opts: Option<String>,
    /// Kernel options to drop.
    #[clap(long)]
    del_opts: Option<String>,
    /// Additional mounts (what:where[:fstype[:options]]).
    #[clap(long = "mount")]
    mounts: Vec<String>,
    /// Additional swap devices (what[:options]).
    #[clap(long = "swap")]
    swaps: Vec<String>,
    /// The BLS architecture key for the entry.
    #[clap(long)]
    architecture: Option<String>,
    /// Skip root device validation.
    #[clap(long, action)]
    no_dev: bool,
}

#[derive(Debug, Parser)]
pub enum ProfileVerb {
    #[clap(name = "list", about = "List OS profiles")]
    List,
    #[clap(name = "create", about = "Create a new OS profile")]
    Create(ProfileCreateOpts),
    #[clap(name = "delete", about = "Delete an OS profile")]
    Delete {
        /// The OS profile identifier (prefix) to delete.
        os_id: String,
    },
    #[clap(name = "show", about = "Show an OS profile")]
    Show {
        /// The OS profile identifier (prefix) to show.
        os_id: String,
    },
}

#[derive(Debug, Parser)]
pub struct ProfileCreateOpts {
    /// The OS name.
    #[clap(long, required_unless_present = "from_host")]
    name: Option<String>,
    /// The OS short name.
    #[clap(long, required_unless_present = "from_host")]
    short_name: Option<String>,
    /// The OS version string.
    #[clap(long = "os-version", required_unless_present = "from_host")]
    os_version: Option<String>,
    /// The OS version id.
    #[clap(long = "os-version-id", required_unless_present = "from_host")]
    os_version_id: Option<String>,
    /// Build identity from the running host's os-release data.
    #[clap(long, action)]
    from_host: bool,
    /// A regex matching `uname -r` output for this OS.
    #[clap(long)]
    uname_pattern: Option<String>,
    /// The kernel image pattern.
    #[clap(long)]
    kernel_pattern: Option<String>,
    /// The initramfs image pattern.
    #[clap(long)]
    initramfs_pattern: Option<String>,
    /// The LVM2 root options template.
    #[clap(long)]
    os_options_lvm2: Option<String>,
    /// The BTRFS root options template.
    #[clap(long)]
    os_options_btrfs: Option<String>,
    /// The kernel command line options template.
    #[clap(long)]
    os_options: Option<String>,
    /// The entry title template.
    #[clap(long)]
    title: Option<String>,
    /// Optional BLS keys permitted for entries using this profile.
    #[clap(long)]
    optional_keys: Option<String>,
}

#[derive(Debug, Parser)]
pub enum HostVerb {
    #[clap(name = "list", about = "List host profiles")]
    List,
    #[clap(name = "create", about = "Create a new host profile")]
    Create(HostCreateOpts),
    #[clap(name = "delete", about = "Delete a host profile")]
    Delete {
        /// The host profile identifier (prefix) to delete.
        host_id: String,
    },
    #[clap(name = "show", about = "Show a host profile")]
    Show {
        /// The host profile identifier (prefix) to show.
        host_id: String,
    },
}

#[derive(Debug, Parser)]
pub struct HostCreateOpts {
    /// The machine id of the host.
    #[clap(long)]
    machine_id: String,
    /// The host name.
    #[clap(long)]
    host_name: String,
    /// The OS profile identifier (prefix) to bind to.
    #[clap(long)]
    profile: String,
    /// An optional label distinguishing profiles for one machine.
    #[clap(long, default_value = "")]
    label: String,
    /// Kernel options to append for this host.
    #[clap(long)]
    add_opts: Option<String>,
    /// Kernel options to drop for this host.
    #[clap(long)]
    del_opts: Option<String>,
    /// Override the kernel command line options template.
    #[clap(long)]
    os_options: Option<String>,
}

#[derive(Debug, Parser)]
pub enum CacheVerb {
    #[clap(name = "list", about = "List cached boot images")]
    List {
        /// List one row per cached image rather than per path.
        #[clap(long, action)]
        images: bool,
    },
    #[clap(name = "backup", about = "Back up a boot image to the cache")]
    Backup {
        /// The image path (relative to /boot) to back up.
        path: String,
    },
    #[clap(name = "restore", about = "Restore a cached boot image")]
    Restore {
        /// The image path (relative to /boot) to restore.
        path: String,
    },
    #[clap(name = "uncache", about = "Remove a path from the image cache")]
    Uncache {
        /// The image path (relative to /boot) to remove.
        path: String,
        /// Remove the path even if boot entries still reference it.
        #[clap(long, action)]
        force: bool,
    },
    #[clap(name = "clean", about = "Remove unused cache entries")]
    Clean,
}

#[derive(Debug, Parser)]
pub enum LegacyVerb {
    #[clap(name = "sync", about = "Regenerate legacy bootloader entries")]
    Sync {
        /// The Grub1 root device to write.
        #[clap(long, default_value = DEFAULT_GRUB1_DEVICE)]
        grub_device: String,
    },
    #[clap(name = "clear", about = "Remove boom entries from the legacy configuration")]
    Clear,
}

#[derive(Debug, Parser)]
pub enum ConfigVerb {
    #[clap(name = "show", about = "Show the active configuration")]
    Show,
    #[clap(name = "write", about = "Write the active configuration to disk")]
    Write,
}

impl BoomCommand {
    /// Run CLI application.
    pub fn run(self) -> Result<()> {
        let config = BoomConfig::load_or_default(&self.boot_dir)
            .with_context(|| format!("loading configuration below {}", self.boot_dir))?;
        let mut ctx = BoomContext::new(config);
        match self.cmd {
            BoomVerb::Entry(verb) => run_entry(&mut ctx, verb),
            BoomVerb::Profile(verb) => run_profile(&mut ctx, verb),
            BoomVerb::Host(verb) => run_host(&mut ctx, verb),
            BoomVerb::Cache(verb) => run_cache(&mut ctx, verb),
            BoomVerb::Legacy(verb) => run_legacy(&mut ctx, verb),
            BoomVerb::Config(verb) => run_config(&mut ctx, verb),
        }
    }
}

#[context("processing entry command")]
fn run_entry(ctx: &mut BoomContext, verb: EntryVerb) -> Result<()> {
    match verb {
        EntryVerb::List(opts) => {
            let width = ctx.entries()?.min_boot_id_width();
            let entries = ctx.find_entries(&opts.to_selection())?;
            println!("{:<width$} {:<24} Title", "BootID", "Version");
            for be in entries {
                println!(
                    "{:<width$} {:<24} {}",
                    &be.boot_id()[..width],
                    be.version(),
                    be.title()
                );
            }
            Ok(())
        }
        EntryVerb::Create(opts) => {
            let (subvol_path, subvol_id) = parse_btrfs_subvol(opts.btrfs_subvolume.as_deref());
            let mut params = BootParams::new(&opts.version)?;
            if let Some(root_device) = &opts.root_device {
                params.set_root_device(root_device);
            }
            if let Some(root_lv) = &opts.root_lv {
                params.set_lvm_root_lv(root_lv);
            }
            if let Some(subvol_path) = subvol_path {
                params.set_btrfs_subvol_path(subvol_path);
            }
            if let Some(subvol_id) = subvol_id {
                params.set_btrfs_subvol_id(subvol_id);
            }

            let mut add_opts: Vec<String> = opts
                .add_opts
                .as_deref()
                .unwrap_or("")
                .split_whitespace()
                .map(String::from)
                .collect();
            add_opts.extend(parse_mount_units(&opts.mounts, ctx.probe())?);
            add_opts.extend(parse_swap_units(&opts.swaps));
            if !add_opts.is_empty() {
                params.set_add_opts(add_opts);
            }
            if let Some(del_opts) = &opts.del_opts {
                params.set_del_opts(del_opts.split_whitespace().map(String::from).collect());
            }

            let entry = ctx.create_entry(
                opts.title.as_deref(),
                &opts.machine_id,
                opts.profile.as_deref(),
                params,
                opts.architecture.as_deref(),
                opts.no_dev,
            )?;
            eprintln!("Created entry with boot_id {}:", &entry.boot_id()[..7]);
            println!("{}", entry.canonical_text());
            Ok(())
        }
        EntryVerb::Delete(opts) => {
            let selection = opts.to_selection();
            if selection.is_null() {
                anyhow::bail!("entry delete requires selection criteria");
            }
            let count = ctx.delete_entries(&selection)?;
            eprintln!("Deleted {count} entries");
            Ok(())
        }
        EntryVerb::Show(opts) => {
            let entries = ctx.find_entries(&opts.to_selection())?;
            for be in entries {
                println!("{}\n", be.canonical_text());
            }
            Ok(())
        }
    }
}

#[context("processing profile command")]
fn run_profile(ctx: &mut BoomContext, verb: ProfileVerb) -> Result<()> {
    match verb {
        ProfileVerb::List => {
            let store = ctx.profiles()?;
            let width = store.min_os_id_width();
            let profiles = store.find(&Selection::default())?;
            println!("{:<width$} {:<24} Version", "OsID", "Name");
            for osp in profiles {
                println!(
                    "{:<width$} {:<24} {}",
                    &osp.os_id()[..width],
                    osp.os_name(),
                    osp.os_version()
                );
            }
            Ok(())
        }
        ProfileVerb::Create(opts) => {
            let mut builder = if opts.from_host {
                OsProfile::builder_from_host_os_release()?
            } else {
                OsProfile::builder(
                    opts.name.clone().unwrap_or_default(),
                    opts.short_name.clone().unwrap_or_default(),
                    opts.os_version.clone().unwrap_or_default(),
                    opts.os_version_id.clone().unwrap_or_default(),
                )
            };
            if let Some(value) = &opts.uname_pattern {
                builder = builder.uname_pattern(value);
            }
            if let Some(value) = &opts.kernel_pattern {
                builder = builder.kernel_pattern(value);
            }
            if let Some(value) = &opts.initramfs_pattern {
                builder = builder.initramfs_pattern(value);
            }
            if let Some(value) = &opts.os_options_lvm2 {
                builder = builder.root_opts_lvm2(value);
            }
            if let Some(value) = &opts.os_options_btrfs {
                builder = builder.root_opts_btrfs(value);
            }
            if let Some(value) = &opts.os_options {
                builder = builder.options(value);
            }
            if let Some(value) = &opts.title {
                builder = builder.title(value);
            }
            if let Some(value) = &opts.optional_keys {
                builder = builder.optional_keys(value);
            }
            let osp = ctx.create_profile(builder.build()?)?;
            eprintln!("Created profile with os_id {}", &osp.os_id()[..7]);
            Ok(())
        }
        ProfileVerb::Delete { os_id } => {
            ctx.delete_profile(&os_id)?;
            eprintln!("Deleted profile {os_id}");
            Ok(())
        }
        ProfileVerb::Show { os_id } => {
            let osp = ctx.profiles()?.by_id(&os_id)?;
            println!("OS ID: \"{}\"", osp.os_id());
            println!("Name: \"{}\"", osp.os_name());
            println!("Short name: \"{}\"", osp.os_short_name());
            println!("Version: \"{}\"", osp.os_version());
            println!("Version ID: \"{}\"", osp.os_version_id());
            println!("UTS release pattern: \"{}\"", osp.uname_pattern());
            println!("Kernel pattern: \"{}\"", osp.kernel_pattern());
            println!("Initramfs pattern: \"{}\"", osp.initramfs_pattern());
            println!("Root options (LVM2): \"{}\"", osp.root_opts_lvm2());
            println!("Root options (BTRFS): \"{}\"", osp.root_opts_btrfs());
            println!("Options: \"{}\"", osp.options());
            println!("Title: \"{}\"", osp.title());
            Ok(())
        }
    }
}

#[context("processing host command")]
fn run_host(ctx: &mut BoomContext, verb: HostVerb) -> Result<()> {
    match verb {
        HostVerb::List => {
            let store = ctx.hosts()?;
            let width = store.min_host_id_width();
            let hosts = store.find(&Selection::default())?;
            println!("{:<width$} {:<24} MachineID", "HostID", "Name");
            for hp in hosts {
                println!(
                    "{:<width$} {:<24} {}",
                    &hp.host_id()[..width],
                    hp.host_name(),
                    hp.machine_id()
                );
            }
            Ok(())
        }
        HostVerb::Create(opts) => {
            let osp = ctx.profiles()?.by_id(&opts.profile)?.clone();
            let mut builder =
                HostProfile::builder(&opts.machine_id, &opts.host_name).label(&opts.label);
            if let Some(value) = &opts.add_opts {
                builder = builder.add_opts(value);
            }
            if let Some(value) = &opts.del_opts {
                builder = builder.del_opts(value);
            }
            if let Some(value) = &opts.os_options {
                builder = builder.options(value);
            }
            let hp = ctx.create_host_profile(builder.build(&osp)?)?;
            eprintln!("Created host profile with host_id {}", &hp.host_id()[..7]);
            Ok(())
        }
        HostVerb::Delete { host_id } => {
            ctx.delete_host_profile(&host_id)?;
            eprintln!("Deleted host profile {host_id}");
            Ok(())
        }
        HostVerb::Show { host_id } => {
            let hp = ctx.hosts()?.by_id(&host_id)?;
            println!("Host ID: \"{}\"", hp.host_id());
            println!("Host name: \"{}\"", hp.host_name());
            println!("Machine ID: \"{}\"", hp.machine_id());
            println!("OS ID: \"{}\"", hp.os_id());
            println!("Label: \"{}\"", hp.label());
            println!("Add options: \"{}\"", hp.add_opts());
            println!("Del options: \"{}\"", hp.del_opts());
            println!("Options: \"{}\"", hp.options());
            Ok(())
        }
    }
}

#[context("processing cache command")]
fn run_cache(ctx: &mut BoomContext, verb: CacheVerb) -> Result<()> {
    match verb {
        CacheVerb::List { images } => {
            let cache = ctx.cache()?;
            let entries = if images {
                cache.find_images(&Selection::default())?
            } else {
                cache.find_paths(&Selection::default())?
            };
            println!("{:<10} {:<10} Path", "ImgID", "State");
            for ce in &entries {
                println!("{:<10} {:<10} {}", ce.disp_img_id(), cache.state(ce), ce.path);
            }
            Ok(())
        }
        CacheVerb::Backup { path } => {
            let ce = ctx.cache()?.backup_path(&path)?;
            eprintln!("Backed up '{path}' as '{}' ({})", ce.path, ce.disp_img_id());
            Ok(())
        }
        CacheVerb::Restore { path } => {
            let ce = ctx.cache()?.restore_path(&path, None)?;
            eprintln!("Restored '{}' ({})", ce.path, ce.disp_img_id());
            Ok(())
        }
        CacheVerb::Uncache { path, force } => {
            if ctx.uncache_path(&path, force)? {
                eprintln!("Removed '{path}' from the cache");
            } else {
                eprintln!("Retained '{path}': still referenced by boot entries");
            }
            Ok(())
        }
        CacheVerb::Clean => {
            let removed = ctx.clean_cache()?;
            eprintln!("Removed {removed} unused cache entries");
            Ok(())
        }
    }
}

#[context("processing legacy command")]
fn run_legacy(ctx: &mut BoomContext, verb: LegacyVerb) -> Result<()> {
    match verb {
        LegacyVerb::Sync { grub_device } => {
            ctx.sync_legacy(&Selection::default(), &grub_device)?;
            eprintln!("Synchronised legacy bootloader configuration");
            Ok(())
        }
        LegacyVerb::Clear => {
            ctx.clear_legacy()?;
            eprintln!("Cleared legacy bootloader configuration");
            Ok(())
        }
    }
}

#[context("processing config command")]
fn run_config(ctx: &mut BoomContext, verb: ConfigVerb) -> Result<()> {
    match verb {
        ConfigVerb::Show => {
            print!("{}", ctx.config().to_ini_string());
            Ok(())
        }
        ConfigVerb::Write => {
            ctx.config().write()?;
            eprintln!("Wrote configuration to {}", ctx.config().config_path());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses() {
        BoomCommand::try_parse_from([
            "boom",
            "entry",
            "create",
            "--version",
            "6.3.1",
            "--title",
            "test",
            "--root-device",
            "/dev/sda1",
            "--no-dev",
        ])
        .unwrap();
        BoomCommand::try_parse_from(["boom", "cache", "list", "--images"]).unwrap();
        BoomCommand::try_parse_from(["boom", "-v", "profile", "list"]).unwrap();
        assert!(BoomCommand::try_parse_from(["boom", "bogus"]).is_err());
    }
}
