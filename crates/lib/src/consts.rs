/// Metadata directory every layer carries; items may never touch it.
pub const META_DIR: &str = ".meta";

/// Where the target subvolume is bind-mounted inside the build appliance.
pub const INSTALL_ROOT: &str = "/__layerc__/install-root";

/// Where local RPM files are bind-mounted inside the build appliance.
pub const RPM_MOUNT_DIR: &str = "/__layerc__/rpms";

/// Per-installer snapshot symlinks inside the build appliance.
pub const DEFAULT_SNAPSHOT_ROOT: &str = "/__layerc__/rpm/default-snapshot-for-installer";

/// Wrapper that runs yum/dnf against a repo snapshot.
pub const YUM_DNF_FROM_SNAPSHOT: &str = "bin/yum-dnf-from-snapshot";
