//! end-to-end warehouse tests against real directory trees

use pretty_assertions::assert_eq;
use std::fs;
use std::path::Path;
use stockyard::graph::Filter;
use stockyard::pallet;
use stockyard::value::Traceable;
use stockyard::warehouse::{Warehouse, WarehouseError};

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn mkdir(root: &Path, rel: &str) {
    fs::create_dir_all(root.join(rel)).unwrap();
}

fn link(root: &Path, rel: &str, target: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::os::unix::fs::symlink(target, path).unwrap();
}

/// The canonical small warehouse: a domain pallet, and a system pallet
/// referencing it through a symlink.
fn dns_warehouse() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();

    write(
        root,
        "transforms.yaml",
        "\
- net.dns.domain:
  - inherit: ~
  - synthesize: \"#[domain.name]\"
- net.dns.fqdn:
  - synthesize: \"#[net.dns.name].#[net.dns.domain]\"
",
    );
    write(
        root,
        "domain/example.com/dns.yaml",
        "domain:\n  name: example.com\n",
    );
    write(
        root,
        "system/vmhost1/host.yaml",
        "net:\n  dns:\n    name: vmhost1\n",
    );
    link(root, "system/vmhost1/domain", "../../domain/example.com");

    dir
}

fn scalar_of(pallet: &pallet::Pallet, key: &str) -> Option<String> {
    pallet.get(key).and_then(Traceable::as_scalar).map(str::to_string)
}

#[test]
fn loads_pallets_and_merges_boxes() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write(root, "transforms.yaml", "[]\n");
    write(root, "system/vmhost1/10-base.yaml", "a: first\nb: base\n");
    write(root, "system/vmhost1/20-site.yaml", "b: site\nc: extra\n");

    let warehouse = Warehouse::load(root).unwrap();
    let pallet = warehouse.pallet("system", "vmhost1").unwrap();

    // later box files win on conflicts, in file name order
    assert_eq!(scalar_of(&pallet, "a").as_deref(), Some("first"));
    assert_eq!(scalar_of(&pallet, "b").as_deref(), Some("site"));
    assert_eq!(scalar_of(&pallet, "c").as_deref(), Some("extra"));

    assert_eq!(pallet.kind(), "system");
    assert_eq!(pallet.full_name(), "vmhost1");
    assert_eq!(pallet.leaf_name(), "vmhost1");
    assert_eq!(pallet.parent_name(), None);
    assert_eq!(pallet.boxes(), vec!["10-base.yaml", "20-site.yaml"]);
}

#[test]
fn values_inherit_through_parent_directories() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write(root, "transforms.yaml", "[]\n");
    write(root, "domain/example.com/dns.yaml", "soa: ns1.example.com\n");
    write(root, "domain/example.com/sub/dns.yaml", "extra: child-only\n");

    let warehouse = Warehouse::load(root).unwrap();
    let child = warehouse.pallet("domain", "example.com/sub").unwrap();

    assert_eq!(child.leaf_name(), "sub");
    assert_eq!(child.parent_name(), Some("example.com"));

    // deep lookup falls back to the parent, shallow does not
    assert_eq!(scalar_of(&child, "soa").as_deref(), Some("ns1.example.com"));
    assert!(child.get_shallow("soa").is_none());
    assert_eq!(scalar_of(&child, "extra").as_deref(), Some("child-only"));
}

#[test]
fn values_inherit_through_symlinks() {
    let dir = dns_warehouse();
    let warehouse = Warehouse::load(dir.path()).unwrap();
    let vmhost = warehouse.pallet("system", "vmhost1").unwrap();

    assert_eq!(scalar_of(&vmhost, "domain.name").as_deref(), Some("example.com"));
    assert!(vmhost.get_shallow("domain.name").is_none());
}

#[test]
fn transforms_derive_values_across_references() {
    let dir = dns_warehouse();
    let warehouse = Warehouse::load(dir.path()).unwrap();

    let vmhost = warehouse.pallet("system", "vmhost1").unwrap();
    assert_eq!(
        scalar_of(&vmhost, "net.dns.fqdn").as_deref(),
        Some("vmhost1.example.com")
    );

    // the domain pallet has no net.dns.name; the rule leaves it alone
    let domain = warehouse.pallet("domain", "example.com").unwrap();
    assert!(domain.get("net.dns.fqdn").is_none());
}

#[test]
fn ancestors_transform_before_descendants() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();

    // beta on the child depends on alpha, which only exists as transform
    // output on the parent
    write(
        root,
        "transforms.yaml",
        "\
- alpha:
  - inherit: ~
  - synthesize: \"#[seed]\"
- beta:
  - synthesize: \"#[alpha]-x\"
",
    );
    write(root, "system/outer/base.yaml", "seed: s\n");
    write(root, "system/outer/inner/own.yaml", "marker: here\n");

    let warehouse = Warehouse::load(root).unwrap();

    let outer = warehouse.pallet("system", "outer").unwrap();
    assert_eq!(scalar_of(&outer, "alpha").as_deref(), Some("s"));

    let inner = warehouse.pallet("system", "outer/inner").unwrap();
    assert_eq!(scalar_of(&inner, "beta").as_deref(), Some("s-x"));
}

#[test]
fn provenance_tracks_files_and_rules() {
    let dir = dns_warehouse();
    let warehouse = Warehouse::load(dir.path()).unwrap();
    let vmhost = warehouse.pallet("system", "vmhost1").unwrap();

    // loaded value: position of the scalar in its box file
    let name = vmhost.get("net.dns.name").unwrap();
    assert_eq!(name.position.file, "system/vmhost1/host.yaml");
    assert_eq!(name.position.line, 3);
    assert!(name.position.is_tracked());

    // derived value: position of the rule that produced it
    let fqdn = vmhost.get("net.dns.fqdn").unwrap();
    assert_eq!(fqdn.position.file, "transforms.yaml");
    assert!(fqdn.position.is_tracked());

    // loader-generated identity: the pallet directory as a whole
    let kind = vmhost.get(pallet::keys::KIND).unwrap();
    assert_eq!(kind.position.file, "system/vmhost1");
    assert!(kind.position.is_tracked());
}

#[test]
fn reference_cycles_fail_the_load() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write(root, "transforms.yaml", "[]\n");
    mkdir(root, "service/a");
    mkdir(root, "service/b");
    link(root, "service/a/peer", "../b");
    link(root, "service/b/peer", "../a");

    let result = Warehouse::load(root);
    assert!(matches!(result, Err(WarehouseError::Cycle(_))));
}

#[test]
fn broken_symlinks_fail_the_load() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write(root, "transforms.yaml", "[]\n");
    mkdir(root, "system/vmhost1");
    link(root, "system/vmhost1/domain", "../../domain/gone");

    let result = Warehouse::load(root);
    assert!(matches!(result, Err(WarehouseError::BrokenLink { .. })));
}

#[test]
fn non_mapping_boxes_fail_the_load() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write(root, "transforms.yaml", "[]\n");
    write(root, "system/vmhost1/bad.yaml", "- just\n- a\n- list\n");

    let result = Warehouse::load(root);
    assert!(matches!(
        result,
        Err(WarehouseError::BoxNotMapping { .. })
    ));
}

#[test]
fn missing_transforms_is_not_a_warehouse() {
    let dir = tempfile::tempdir().unwrap();
    mkdir(dir.path(), "system/vmhost1");

    let result = Warehouse::load(dir.path());
    assert!(matches!(result, Err(WarehouseError::NotAWarehouse { .. })));
}

#[test]
fn query_matches_own_and_inherited_values() {
    let dir = dns_warehouse();
    let warehouse = Warehouse::load(dir.path()).unwrap();

    // inherited through the symlink
    let in_domain = Filter::new()
        .key("pallet.kind", "system")
        .key("domain.name", "example.com");
    let matched = warehouse.query(&in_domain);
    assert_eq!(matched.len(), 1);
    assert_eq!(matched[0].full_name(), "vmhost1");

    // regexp term
    let by_pattern = Filter::new()
        .key_matches("net.dns.fqdn", regex::Regex::new(r"\.example\.com$").unwrap());
    assert_eq!(warehouse.query(&by_pattern).len(), 1);

    // empty filter matches everything
    assert_eq!(warehouse.query(&Filter::new()).len(), 2);
}

#[test]
fn fetch_requires_exactly_one_match() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write(root, "transforms.yaml", "[]\n");
    mkdir(root, "system/vmhost1");
    mkdir(root, "system/vmhost2");

    let warehouse = Warehouse::load(root).unwrap();

    let one = warehouse
        .fetch(&pallet::identity_filter("system", "vmhost1"))
        .unwrap();
    assert_eq!(one.full_name(), "vmhost1");

    let many = warehouse.fetch(&Filter::new().key("pallet.kind", "system"));
    let error = many.unwrap_err();
    assert_eq!(error.matched, 2);
    assert_eq!(error.to_string(), "pallet.kind=system matched 2 pallets");

    let none = warehouse.fetch(&pallet::identity_filter("system", "vmhost3"));
    assert_eq!(none.unwrap_err().matched, 0);
}

#[test]
fn dotfiles_are_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write(root, "transforms.yaml", "[]\n");
    write(root, "system/vmhost1/host.yaml", "a: visible\n");
    write(root, "system/vmhost1/.hidden.yaml", "a: hidden\n");
    mkdir(root, ".git/objects");

    let warehouse = Warehouse::load(root).unwrap();
    assert_eq!(warehouse.pallets().count(), 1);

    let pallet = warehouse.pallet("system", "vmhost1").unwrap();
    assert_eq!(scalar_of(&pallet, "a").as_deref(), Some("visible"));
    assert_eq!(pallet.boxes(), vec!["host.yaml"]);
}

#[test]
fn reader_splits_concatenated_values() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write(
        root,
        "transforms.yaml",
        "- net.dns.aliases:\n  - concatenate: \" \"\n",
    );
    write(
        root,
        "system/vmhost1/dns.yaml",
        "net:\n  dns:\n    aliases:\n      - www\n      - mail\n",
    );

    let warehouse = Warehouse::load(root).unwrap();
    let pallet = warehouse.pallet("system", "vmhost1").unwrap();

    let stored = scalar_of(&pallet, "net.dns.aliases").unwrap();
    assert_eq!(stored, "www mail");
    assert_eq!(
        warehouse.reader().structured("net.dns.aliases", &stored),
        Some(vec!["www".to_string(), "mail".to_string()])
    );
}

#[test]
fn loading_is_deterministic_and_retransform_idempotent() {
    let dir = dns_warehouse();

    let snapshot = |warehouse: &Warehouse| {
        warehouse
            .pallets()
            .map(|p| {
                format!(
                    "{}/{}\n{}",
                    p.kind(),
                    p.full_name(),
                    serde_yaml::to_string(&p).unwrap()
                )
            })
            .collect::<Vec<_>>()
    };

    let first = Warehouse::load(dir.path()).unwrap();
    let second = Warehouse::load(dir.path()).unwrap();
    assert_eq!(snapshot(&first), snapshot(&second));

    let mut third = Warehouse::load(dir.path()).unwrap();
    let before = snapshot(&third);
    third.transform_all().unwrap();
    assert_eq!(snapshot(&third), before);
}

#[test]
fn positions_ride_along_in_serialized_output() {
    let dir = dns_warehouse();
    let warehouse = Warehouse::load(dir.path()).unwrap();
    let vmhost = warehouse.pallet("system", "vmhost1").unwrap();

    let yaml = serde_yaml::to_string(&vmhost.with_positions()).unwrap();
    assert!(yaml.contains("vmhost1 @ system/vmhost1/host.yaml (line 3,"));
    assert!(yaml.contains("@ transforms.yaml"));
}
