//! The resource catalog (SPEC_FULL.md §4.8): the declarative
//! `(path, {child -> policy})` tables that replace the original project's
//! dozens of near-duplicate handler types with configuration over one
//! generic [crate::handler::EmulatedHandler].

use crate::descriptor::EmulatedResource;
use crate::handler::emulated::Child;
use crate::handler::{EmulatedHandler, HandlerRegistry, PassthroughHandler};
use crate::policy::WritePolicy;
use std::collections::HashMap;
use std::sync::Arc;

/// Paths whose sysctls are not net-namespaced and therefore behave as
/// kernel-wide shared state across every container on the host (spec §1,
/// §4.5's max-/min-wins rationale). Exposed so an embedder's [FakeAgent]
/// setup in tests can be told which paths to treat as globally shared.
pub fn globally_shared_paths() -> Vec<String> {
    vec![
        "/proc/sys/net/netfilter/nf_conntrack_max".to_string(),
        "/sys/module/nf_conntrack/parameters/hashsize".to_string(),
        "/proc/sys/fs/file-max".to_string(),
        "/proc/sys/vm/mmap_min_addr".to_string(),
    ]
}

/// Builds the full handler registry: one [EmulatedHandler] per catalog
/// directory, plus the wildcard [PassthroughHandler] for everything else
/// (spec §4.1).
pub fn build_registry(
    passthrough: Arc<PassthroughHandler>,
    retries: u32,
    ignore_errors: bool,
) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new(passthrough.clone());

    register_dir(&mut registry, &passthrough, retries, ignore_errors, "/proc/sys/kernel", kernel_children());
    register_dir(&mut registry, &passthrough, retries, ignore_errors, "/proc/sys/net/core", net_core_children());
    register_dir(&mut registry, &passthrough, retries, ignore_errors, "/proc/sys/net/netfilter", netfilter_children());
    register_dir(
        &mut registry,
        &passthrough,
        retries,
        ignore_errors,
        "/sys/module/nf_conntrack/parameters",
        nf_conntrack_sysfs_children(),
    );
    register_dir(&mut registry, &passthrough, retries, ignore_errors, "/proc/sys/fs", fs_children());
    register_dir(&mut registry, &passthrough, retries, ignore_errors, "/proc/sys/vm", vm_children());
    register_dir(
        &mut registry,
        &passthrough,
        retries,
        ignore_errors,
        "/sys/devices/virtual",
        sys_devices_virtual_children(),
    );
    register_dir(&mut registry, &passthrough, retries, ignore_errors, "/proc", uptime_children());

    registry
}

fn register_dir(
    registry: &mut HandlerRegistry,
    passthrough: &Arc<PassthroughHandler>,
    retries: u32,
    ignore_errors: bool,
    path: &str,
    children: HashMap<String, Child>,
) {
    let descriptors: Vec<Arc<EmulatedResource>> = children.values().map(|c| c.descriptor.clone()).collect();
    registry.register_children(path, descriptors);

    let handler = Arc::new(EmulatedHandler::new(
        path.to_string(),
        children,
        passthrough.clone(),
        retries,
        ignore_errors,
    ));
    registry.register(path, handler);
}

fn one(name: &str, child: Child) -> (String, Child) {
    (name.to_string(), child)
}

/// `/proc/sys/kernel`: `hostname`/`domainname` as passthrough-pushed
/// strings, `panic` and `printk` writable ints, `cap_last_cap` read-only,
/// and `random/uuid` (left unemulated here — its directory, `random/`, is
/// not in this table, so it falls straight through to passthrough and is
/// covered by [crate::config::Config::no_cache_paths] instead).
fn kernel_children() -> HashMap<String, Child> {
    HashMap::from([
        one(
            "hostname",
            Child::writable(EmulatedResource::file("hostname", 0o644), WritePolicy::str_(true)),
        ),
        one(
            "domainname",
            Child::writable(EmulatedResource::file("domainname", 0o644), WritePolicy::str_(true)),
        ),
        one(
            "panic",
            Child::writable(EmulatedResource::file("panic", 0o644), WritePolicy::int(-1, 3600, true)),
        ),
        one(
            "printk",
            Child::writable(EmulatedResource::file("printk", 0o644), WritePolicy::str_(true)),
        ),
        one(
            "cap_last_cap",
            Child::read_only(EmulatedResource::file("cap_last_cap", 0o444)),
        ),
    ])
}

/// `/proc/sys/net/core`: `somaxconn` a bounded int, `default_qdisc`
/// restricted to the schedulers the kernel ships by default.
fn net_core_children() -> HashMap<String, Child> {
    HashMap::from([
        one(
            "somaxconn",
            Child::writable(EmulatedResource::file("somaxconn", 0o644), WritePolicy::int(1, 65535, true)),
        ),
        one(
            "default_qdisc",
            Child::writable(
                EmulatedResource::file("default_qdisc", 0o644),
                WritePolicy::enum_(
                    ["pfifo_fast", "fq_codel", "fq", "sfq", "cake"],
                    true,
                ),
            ),
        ),
    ])
}

/// `/proc/sys/net/netfilter`: `nf_conntrack_max` is the canonical max-wins
/// resource (spec S2), since it is genuinely shared across every container's
/// network namespace on most kernel configurations.
fn netfilter_children() -> HashMap<String, Child> {
    HashMap::from([one(
        "nf_conntrack_max",
        Child::writable(EmulatedResource::file("nf_conntrack_max", 0o644), WritePolicy::max_int(true)),
    )])
}

/// `/sys/module/nf_conntrack/parameters`: the sysfs-exposed alias for the
/// same conntrack table size, mirroring the netfilter directory.
fn nf_conntrack_sysfs_children() -> HashMap<String, Child> {
    HashMap::from([one(
        "hashsize",
        Child::writable(EmulatedResource::file("hashsize", 0o644), WritePolicy::max_int(true)),
    )])
}

/// `/proc/sys/fs`: `protected_hardlinks`/`protected_symlinks` are boolean
/// hardening toggles (spec S4), `file-max` is max-wins shared state.
fn fs_children() -> HashMap<String, Child> {
    HashMap::from([
        one(
            "protected_hardlinks",
            Child::writable(EmulatedResource::file("protected_hardlinks", 0o644), WritePolicy::bool_(true)),
        ),
        one(
            "protected_symlinks",
            Child::writable(EmulatedResource::file("protected_symlinks", 0o644), WritePolicy::bool_(true)),
        ),
        one(
            "file-max",
            Child::writable(EmulatedResource::file("file-max", 0o644), WritePolicy::max_int(true)),
        ),
    ])
}

/// `/proc/sys/vm`: `overcommit_memory` a bounded enum-like int,
/// `mmap_min_addr` max-wins (spec S3).
fn vm_children() -> HashMap<String, Child> {
    HashMap::from([
        one(
            "overcommit_memory",
            Child::writable(EmulatedResource::file("overcommit_memory", 0o644), WritePolicy::int(0, 2, true)),
        ),
        one(
            "mmap_min_addr",
            Child::writable(EmulatedResource::file("mmap_min_addr", 0o644), WritePolicy::max_int(true)),
        ),
    ])
}

/// `/sys/devices/virtual`: read-only synthesized identity. These nodes are
/// exposed with root/root ownership regardless of the container's uid/gid
/// mapping, resolving the Open Question of spec §9.
fn sys_devices_virtual_children() -> HashMap<String, Child> {
    HashMap::from([
        one(
            "dmi",
            Child::read_only(EmulatedResource::directory("dmi", 0o755).with_skip_id_remap()),
        ),
        one(
            "product_name",
            Child::read_only(EmulatedResource::file("product_name", 0o444).with_skip_id_remap()),
        ),
    ])
}

/// `/proc/uptime`: a read-only passthrough-backed file that only needs size
/// rewriting, not emulation of its content.
fn uptime_children() -> HashMap<String, Child> {
    HashMap::from([one(
        "uptime",
        Child::read_only(EmulatedResource::file("uptime", 0o444)),
    )])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::FakeAgent;

    #[test]
    fn build_registry_dispatches_vm_and_falls_through_elsewhere() {
        let agent = Arc::new(FakeAgent::new(globally_shared_paths()));
        let passthrough = Arc::new(PassthroughHandler::new(agent));
        let registry = build_registry(passthrough, 5, false);

        let vm_handler = registry.find_handler("/proc/sys/vm/overcommit_memory");
        let other_handler = registry.find_handler("/proc/sys/vm/overcommit_memory");
        assert!(Arc::ptr_eq(&vm_handler, &other_handler), "same path must resolve to the same handler");

        let children = registry.children_at("/proc/sys/vm");
        let names: Vec<&str> = children.iter().map(|c| c.name.as_str()).collect();
        assert!(names.contains(&"overcommit_memory"));
        assert!(names.contains(&"mmap_min_addr"));
    }
}
