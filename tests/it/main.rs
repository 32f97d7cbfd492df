//! Integration tests: drive the full boom workflow against a scratch
//! boot file system.

use boom::bootloader::{BootEntry, BootParams};
use boom::cache::CacheState;
use boom::config::BoomConfig;
use boom::context::BoomContext;
use boom::digest::sha1_hex_of_file;
use boom::hostprofile::HostProfile;
use boom::osprofile::OsProfile;
use boom::platform::TestProbe;
use boom::profile::Profile;
use boom::selection::Selection;

use camino::Utf8PathBuf;

fn scratch_boot() -> (tempfile::TempDir, BoomConfig) {
    let td = tempfile::tempdir().unwrap();
    let boot = Utf8PathBuf::from_path_buf(td.path().to_path_buf()).unwrap();
    for dir in ["loader/entries", "boom/profiles/hosts", "boom/cache"] {
        std::fs::create_dir_all(boot.join(dir)).unwrap();
    }
    (td, BoomConfig::with_boot_path(&boot))
}

fn context(config: &BoomConfig) -> BoomContext {
    BoomContext::with_probe(config.clone(), Box::new(TestProbe::default()))
}

fn rhel72() -> OsProfile {
    OsProfile::builder(
        "Red Hat Enterprise Linux Server",
        "rhel",
        "7.2 (Maipo)",
        "7.2",
    )
    .uname_pattern("el7")
    .options("root=%{root_device} ro %{root_opts} rhgb quiet")
    .root_opts_lvm2("rd.lvm.lv=%{lvm_root_lv}")
    .kernel_pattern("/vmlinuz-%{version}")
    .initramfs_pattern("/initramfs-%{version}.img")
    .build()
    .unwrap()
}

fn lvm_params() -> BootParams {
    let mut params = BootParams::new("3.10-23.el7").unwrap();
    params.set_root_device("/dev/vg00/lvol0");
    params.set_lvm_root_lv("vg00/lvol0");
    params
}

fn write_boot_images(config: &BoomConfig) {
    std::fs::write(config.boot_path.join("vmlinuz-3.10-23.el7"), "kernel bytes").unwrap();
    std::fs::write(
        config.boot_path.join("initramfs-3.10-23.el7.img"),
        "initramfs bytes",
    )
    .unwrap();
}

#[test]
fn test_create_load_roundtrip() {
    let (_td, config) = scratch_boot();
    let mut ctx = context(&config);
    ctx.create_profile(rhel72()).unwrap();
    write_boot_images(&config);

    let boot_id = ctx
        .create_entry(Some("title"), "ffffffff", None, lvm_params(), None, true)
        .unwrap()
        .boot_id();

    // A fresh context sees the persisted state and recovers the same
    // composition.
    let mut fresh = context(&config);
    let entries = fresh.find_entries(&Selection::default()).unwrap();
    assert_eq!(entries.len(), 1);
    let be = entries[0];

    // Identity purity: the reloaded entry hashes to the name on disk.
    assert_eq!(be.boot_id(), boot_id);
    let file_name = be.last_path().unwrap().file_name().unwrap();
    assert_eq!(
        file_name,
        format!("ffffffff-{}-3.10-23.el7.conf", &boot_id[..7])
    );

    // Reverse matching recovered the boot parameters.
    let bp = be.params().expect("boot parameters recovered");
    assert_eq!(bp.version(), "3.10-23.el7");
    assert_eq!(bp.root_device(), Some("/dev/vg00/lvol0"));
    assert_eq!(bp.lvm_root_lv(), Some("vg00/lvol0"));

    // The profile was re-attached from the #OsIdentifier comment.
    let profile = be.profile().expect("profile bound");
    assert_eq!(profile.os_short_name(), "rhel");
}

#[test]
fn test_profile_reattach_without_comment() {
    let (_td, config) = scratch_boot();
    let mut ctx = context(&config);
    ctx.create_profile(rhel72()).unwrap();

    // A foreign-authored snippet: no #OsIdentifier comment, but the
    // uname pattern matches the version.
    let entries_dir = config.entries_path();
    std::fs::write(
        entries_dir.join("ffffffff-abcdef012-3.10-23.el7.conf"),
        "title imported\nmachine-id ffffffff\nversion 3.10-23.el7\n\
         linux /vmlinuz-3.10-23.el7\ninitrd /initramfs-3.10-23.el7.img\n\
         options root=/dev/vg00/lvol0 ro rd.lvm.lv=vg00/lvol0 rhgb quiet\n",
    )
    .unwrap();

    let mut fresh = context(&config);
    let entries = fresh.find_entries(&Selection::default()).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].profile().unwrap().os_short_name(), "rhel");
    assert_eq!(
        entries[0].params().unwrap().lvm_root_lv(),
        Some("vg00/lvol0")
    );
}

#[test]
fn test_host_profile_precedence_on_load() {
    let (_td, config) = scratch_boot();
    let mut ctx = context(&config);
    let osp = ctx.create_profile(rhel72()).unwrap().clone();
    let hp = HostProfile::builder("ffffffff", "db1.example.com")
        .add_opts("audit=1")
        .del_opts("rhgb quiet")
        .build(&osp)
        .unwrap();
    ctx.create_host_profile(hp).unwrap();

    let be_options = ctx
        .create_entry(Some("title"), "ffffffff", None, lvm_params(), None, true)
        .unwrap()
        .options();
    assert!(be_options.contains("audit=1"));
    assert!(!be_options.contains("rhgb"));

    // Reload: host wrap is re-applied and the composition is stable.
    let mut fresh = context(&config);
    let entries = fresh.find_entries(&Selection::default()).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].options(), be_options);
}

#[test]
fn test_cache_restore_scenario() {
    let (_td, config) = scratch_boot();
    let mut ctx = context(&config);
    write_boot_images(&config);

    let ce = ctx.cache().unwrap().cache_path("/vmlinuz-3.10-23.el7").unwrap();
    let img_id = ce.img_id().to_string();

    // Delete the kernel from /boot: state becomes MISSING.
    std::fs::remove_file(config.boot_path.join("vmlinuz-3.10-23.el7")).unwrap();
    let cache = ctx.cache().unwrap();
    let ce = cache
        .find_paths(&Selection::default())
        .unwrap()
        .into_iter()
        .next()
        .unwrap();
    assert_eq!(cache.state(&ce), CacheState::Missing);

    // Restore: contents, metadata and sentinel all come back.
    let ce = cache.restore_path("/vmlinuz-3.10-23.el7", None).unwrap();
    assert_eq!(cache.state(&ce), CacheState::Restored);
    let restored = config.boot_path.join("vmlinuz-3.10-23.el7");
    assert_eq!(sha1_hex_of_file(&restored).unwrap(), img_id);
    assert!(config
        .boot_path
        .join(".vmlinuz-3.10-23.el7.boomrestored")
        .exists());
}

#[test]
fn test_read_only_and_selection() {
    let (_td, config) = scratch_boot();
    let mut ctx = context(&config);
    ctx.create_profile(rhel72()).unwrap();
    write_boot_images(&config);

    ctx.create_entry(Some("title"), "ffffffff", None, lvm_params(), None, true)
        .unwrap();

    // A hand-authored entry with a non-boom name loads read-only and
    // stays invisible to deletion by selection (it is bound to the
    // null profile, which default selections exclude).
    std::fs::write(
        config.entries_path().join("custom.conf"),
        "title Custom\nlinux /vmlinuz-custom\noptions custom=1\n",
    )
    .unwrap();

    let mut fresh = context(&config);
    let visible = fresh.find_entries(&Selection::default()).unwrap().len();
    assert_eq!(visible, 1);

    let all = fresh
        .find_entries(&Selection {
            allow_null_profile: true,
            ..Default::default()
        })
        .unwrap();
    assert_eq!(all.len(), 2);
    let custom: Vec<&&BootEntry> = all.iter().filter(|be| be.is_read_only()).collect();
    assert_eq!(custom.len(), 1);
    assert_eq!(custom[0].title(), "Custom");
}

#[test]
fn test_entry_file_format() {
    let (_td, config) = scratch_boot();
    let mut ctx = context(&config);
    ctx.create_profile(rhel72()).unwrap();

    let mut params = lvm_params();
    params.set_add_opts(vec!["debug".to_string()]);
    let boot_id = ctx
        .create_entry(Some("title"), "ffffffff", None, params, None, true)
        .unwrap()
        .boot_id();

    let path = config
        .entries_path()
        .join(format!("ffffffff-{}-3.10-23.el7.conf", &boot_id[..7]));
    let text = std::fs::read_to_string(&path).unwrap();

    let mut lines = text.lines();
    let first = lines.next().unwrap();
    assert!(first.starts_with("#OsIdentifier: "));
    similar_asserts::assert_eq!(
        lines.collect::<Vec<_>>().join("\n"),
        "title title\n\
         machine-id ffffffff\n\
         version 3.10-23.el7\n\
         linux /vmlinuz-3.10-23.el7\n\
         initrd /initramfs-3.10-23.el7.img\n\
         options root=/dev/vg00/lvol0 ro rd.lvm.lv=vg00/lvol0 rhgb quiet debug"
    );
}
